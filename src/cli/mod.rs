//! CLI command definitions and parsing
use crate::retrieval::SearchConstraints;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lectern",
    version,
    about = "Search and context engine for question answering over study documents",
    long_about = "Lectern indexes document passages locally and answers queries with semantic search, \
                  hybrid semantic + keyword search, and token-bounded context blocks for prompting a \
                  language model."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/lectern/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config (e.g., "keyword-heavy", "no-cache")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index passages from a JSON Lines file
    Index {
        /// File with one passage object per line
        file: PathBuf,
    },

    /// Remove every passage of a source
    Remove {
        source_id: String,
    },

    /// Rank passages by semantic similarity
    Search {
        query: String,

        #[command(flatten)]
        options: QueryArgs,
    },

    /// Combine semantic and keyword rankings
    Hybrid {
        query: String,

        #[command(flatten)]
        options: QueryArgs,

        /// Weight of the semantic ranking (defaults to config)
        #[arg(long)]
        semantic_weight: Option<f32>,

        /// Weight of the keyword ranking (defaults to config)
        #[arg(long)]
        lexical_weight: Option<f32>,
    },

    /// Build a token-bounded context block for a question
    Context {
        query: String,

        #[command(flatten)]
        options: QueryArgs,

        /// Token budget for the assembled context
        #[arg(short, long, default_value = "512")]
        budget: usize,
    },

    /// Suggest completions from previous queries
    Suggest {
        prefix: String,

        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show index and storage statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by the query commands
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Maximum number of results (defaults to config)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Only passages from this source (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Only passages in this category (repeatable)
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// Only passages in this language (repeatable)
    #[arg(long = "language")]
    pub languages: Vec<String>,

    /// Only passages created at or after this RFC 3339 time
    #[arg(long)]
    pub after: Option<DateTime<Utc>>,

    /// Only passages created at or before this RFC 3339 time
    #[arg(long)]
    pub before: Option<DateTime<Utc>>,

    /// Drop results scoring below this
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Show results in JSON format
    #[arg(long)]
    pub json: bool,
}

impl QueryArgs {
    pub fn constraints(&self) -> SearchConstraints {
        let constraints = SearchConstraints::default()
            .with_sources(self.sources.iter().cloned())
            .with_categories(self.categories.iter().cloned())
            .with_languages(self.languages.iter().cloned())
            .created_between(self.after, self.before);

        match self.min_score {
            Some(min_score) => constraints.with_min_score(min_score),
            None => constraints,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_args_to_constraints() {
        let cli = Cli::try_parse_from([
            "lectern",
            "search",
            "krebs cycle",
            "--source",
            "bio.pdf",
            "--source",
            "chem.pdf",
            "--language",
            "en",
            "--min-score",
            "0.4",
            "-k",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Search { query, options } => {
                assert_eq!(query, "krebs cycle");
                assert_eq!(options.top_k, Some(3));
                let constraints = options.constraints();
                assert_eq!(constraints.source_ids.len(), 2);
                assert!(constraints.languages.contains("en"));
                assert_eq!(constraints.min_score, Some(0.4));
                assert!(constraints.categories.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_constraints_empty() {
        assert!(QueryArgs::default().constraints().is_empty());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "lectern",
            "context",
            "what is osmosis",
            "--budget",
            "200",
            "--profile",
            "no-cache",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.profile.as_deref(), Some("no-cache"));
        assert!(matches!(cli.command, Commands::Context { budget: 200, .. }));
    }

    #[test]
    fn test_date_parsing() {
        let cli = Cli::try_parse_from([
            "lectern",
            "hybrid",
            "enzymes",
            "--after",
            "2024-01-01T00:00:00Z",
            "--semantic-weight",
            "0.7",
            "--lexical-weight",
            "0.3",
        ])
        .unwrap();

        match cli.command {
            Commands::Hybrid {
                options,
                semantic_weight,
                lexical_weight,
                ..
            } => {
                assert!(options.after.is_some());
                assert_eq!(semantic_weight, Some(0.7));
                assert_eq!(lexical_weight, Some(0.3));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["lectern", "search", "x", "--after", "yesterday"]).is_err());
    }
}
