/// Query and passage embedding
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into a fixed-size vector
///
/// Calls are synchronous and may be CPU heavy; the engine runs them on the
/// blocking pool.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts at once, in order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Supported local models: (name, fastembed model, dimension, approximate download MB)
const MODELS: &[(&str, EmbeddingModel, usize, usize)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384, 90),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384, 130),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768, 440),
];

/// Dimension of a supported model, matched case-insensitively
pub fn model_dimension(model_name: &str) -> Option<usize> {
    MODELS
        .iter()
        .find(|(name, ..)| name.eq_ignore_ascii_case(model_name))
        .map(|(_, _, dimension, _)| *dimension)
}

/// Local embedding through fastembed (ONNX runtime, no network at query time)
///
/// Models are downloaded to the fastembed cache on first use.
pub struct FastEmbedProvider {
    model: TextEmbedding,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (name, model, dimension, size_mb) = MODELS
            .iter()
            .find(|(name, ..)| name.eq_ignore_ascii_case(model_name))
            .cloned()
            .ok_or_else(|| {
                let supported: Vec<&str> = MODELS.iter().map(|(name, ..)| *name).collect();
                EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: {}",
                    model_name,
                    supported.join(", ")
                ))
            })?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            name,
            dimension,
            size_mb
        );

        let init_options = InitOptions::new(model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: name.to_string(),
            dimension,
        })
    }

    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2")
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), EmbeddingError> {
        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

impl Embedder for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let embedding = self
            .model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))?;

        self.check_dimension(&embedding)?;
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Text at position {} is empty",
                position
            )));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
