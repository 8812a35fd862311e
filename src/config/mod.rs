//! Configuration management for Lectern
//!
//! Loads a TOML document, applies a named profile and `LECTERN_*` environment
//! overrides, then validates the result.

use crate::error::{LecternError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
    pub max_elements: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.lectern"),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            vector_dim: 384,
            hnsw_ef_construction: 200,
            hnsw_m: 16,
            hnsw_ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Query pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not pass top_k
    pub default_top_k: usize,
    /// Longest accepted query, in characters
    pub max_query_length: usize,
    /// Oracles are asked for top_k * candidate_multiplier hits
    pub candidate_multiplier: usize,
    /// RRF damping constant
    pub rrf_k: f32,
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    /// Upper bound on a single oracle call
    pub oracle_timeout_ms: u64,
    /// Attach highlighted text to returned candidates
    pub highlight: bool,
    /// Build RAG context from hybrid results when a lexical oracle is present
    pub hybrid_context: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_query_length: 1000,
            candidate_multiplier: 3,
            rrf_k: 60.0,
            semantic_weight: 0.5,
            lexical_weight: 0.5,
            oracle_timeout_ms: 5000,
            highlight: true,
            hybrid_context: false,
        }
    }
}

/// Additive boosts applied by the relevance scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub exact_match_boost: f32,
    pub section_match_boost: f32,
    pub ideal_length_boost: f32,
    /// Inclusive character range that earns the length boost
    pub ideal_length_min: usize,
    pub ideal_length_max: usize,
    pub section_present_boost: f32,
    pub recency_boost: f32,
    pub recency_window_days: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_match_boost: 0.10,
            section_match_boost: 0.05,
            ideal_length_boost: 0.02,
            ideal_length_min: 80,
            ideal_length_max: 1500,
            section_present_boost: 0.02,
            recency_boost: 0.01,
            recency_window_days: 30,
        }
    }
}

/// Context window assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub chars_per_token: usize,
    /// Partial excerpts shorter than this are dropped instead of emitted
    pub min_fragment_chars: usize,
    /// Placed between consecutive excerpts
    pub separator: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            min_fragment_chars: 20,
            separator: "\n\n".to_string(),
        }
    }
}

/// Query cache bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries per cache table; 0 disables caching
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            ttl_secs: 300,
        }
    }
}

/// Autocomplete index bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub max_entries: usize,
    /// Number of stored queries loaded at startup
    pub history_limit: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            history_limit: 1000,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_multiplier: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LecternError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LecternError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(weight) = overrides.semantic_weight {
            self.retrieval.semantic_weight = weight;
        }
        if let Some(weight) = overrides.lexical_weight {
            self.retrieval.lexical_weight = weight;
        }
        if let Some(multiplier) = overrides.candidate_multiplier {
            self.retrieval.candidate_multiplier = multiplier;
        }
        if overrides.cache_enabled == Some(false) {
            self.cache.max_entries = 0;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LECTERN_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LECTERN_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "RETRIEVAL__SEMANTIC_WEIGHT" => {
                self.retrieval.semantic_weight = parse_env(path, value)?
            }
            "RETRIEVAL__LEXICAL_WEIGHT" => self.retrieval.lexical_weight = parse_env(path, value)?,
            "RETRIEVAL__ORACLE_TIMEOUT_MS" => {
                self.retrieval.oracle_timeout_ms = parse_env(path, value)?
            }
            "RETRIEVAL__HIGHLIGHT" => self.retrieval.highlight = parse_env(path, value)?,
            "CACHE__MAX_ENTRIES" => self.cache.max_entries = parse_env(path, value)?,
            "CACHE__TTL_SECS" => self.cache.ttl_secs = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LecternError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("lectern").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| LecternError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("lectern"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| LecternError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "keyword-heavy".to_string(),
            ProfileOverrides {
                semantic_weight: Some(0.3),
                lexical_weight: Some(0.7),
                ..Default::default()
            },
        );
        profiles.insert(
            "no-cache".to_string(),
            ProfileOverrides {
                cache_enabled: Some(false),
                ..Default::default()
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            scoring: ScoringConfig::default(),
            context: ContextConfig::default(),
            cache: CacheConfig::default(),
            suggestions: SuggestionConfig::default(),
            profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.retrieval.semantic_weight = 0.6;
        config.retrieval.lexical_weight = 0.4;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!((loaded.retrieval.semantic_weight - 0.6).abs() < 1e-6);
        assert_eq!(loaded.scoring.ideal_length_max, 1500);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[_meta]
schema_version = "1.0.0"

[storage]
data_dir = "/tmp/lectern"

[embedding]
model = "all-MiniLM-L6-v2"
batch_size = 16

[indexing]
vector_dim = 384
hnsw_ef_construction = 200
hnsw_m = 16
hnsw_ef_search = 64
max_elements = 1000
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retrieval.default_top_k, 10);
        assert!((config.scoring.exact_match_boost - 0.10).abs() < 1e-6);
        assert_eq!(config.context.chars_per_token, 4);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/lectern.toml"));
        assert!(matches!(result, Err(LecternError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.apply_profile("keyword-heavy").unwrap();
        assert!((config.retrieval.lexical_weight - 0.7).abs() < 1e-6);

        config.apply_profile("no-cache").unwrap();
        assert_eq!(config.cache.max_entries, 0);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config
            .set_value_from_env("RETRIEVAL__SEMANTIC_WEIGHT", "0.25")
            .unwrap();
        assert!((config.retrieval.semantic_weight - 0.25).abs() < 1e-6);

        let err = config.set_value_from_env("CACHE__TTL_SECS", "soon");
        assert!(matches!(err, Err(LecternError::InvalidConfigValue { .. })));
    }
}
