//! Embedding generation for vector search and the answer cache

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use datalive_kg::{EmbeddingService, KgError, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

/// Local fastembed model
///
/// Inference is CPU-bound, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    dimension: usize,
}

impl FastEmbedder {
    /// Multilingual E5 small (384 dimensions)
    pub fn new() -> anyhow::Result<Self> {
        Self::with_model(EmbeddingModel::MultilingualE5Small)
    }

    pub fn with_model(model_name: EmbeddingModel) -> anyhow::Result<Self> {
        info!("Initializing embedding model: {:?}", model_name);

        let dimension = match model_name {
            EmbeddingModel::MultilingualE5Small => 384,
            EmbeddingModel::MultilingualE5Base => 768,
            EmbeddingModel::MultilingualE5Large => 1024,
            EmbeddingModel::BGEBaseENV15 => 768,
            _ => 384,
        };

        let mut options = InitOptions::default();
        options.model_name = model_name;
        options.show_download_progress = true;

        let model = TextEmbedding::try_new(options)
            .context("Failed to initialize embedding model")?;

        Ok(Self {
            model: Arc::new(model),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_prefixed(&self, text: String) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|e| KgError::EmbeddingError(format!("embedding task failed: {}", e)))?
            .map_err(|e| KgError::EmbeddingError(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| KgError::EmbeddingError("No embedding generated".to_string()))
    }

    /// Document-side embedding (E5 `passage:` prefix)
    pub async fn embed_passage(&self, passage: &str) -> Result<Vec<f32>> {
        self.embed_prefixed(format!("passage: {}", passage)).await
    }
}

#[async_trait]
impl EmbeddingService for FastEmbedder {
    /// Query-side embedding (E5 `query:` prefix)
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_prefixed(format!("query: {}", text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_embedding_generation() {
        let embedder = FastEmbedder::new().unwrap();

        let query = embedder.embed("What is DataLive?").await.unwrap();
        assert_eq!(query.len(), embedder.dimension());

        let passage = embedder.embed_passage("DataLive answers questions.").await.unwrap();
        assert_eq!(passage.len(), 384);
    }
}
