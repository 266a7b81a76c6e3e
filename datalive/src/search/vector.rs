//! Vector search using LanceDB

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use datalive_kg::{EmbeddingService, KgError};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;
use tracing::{debug, info};

use super::types::SearchDocument;
use crate::services::{DocumentHit, SearchFilters, SemanticSearch};

/// Dimension of the default multilingual E5 small model
pub const DEFAULT_DIMENSION: i32 = 384;

const TABLE_NAME: &str = "documents";

/// Quote a value for a LanceDB filter expression
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn filter_expression(filters: &SearchFilters) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(ref document_type) = filters.document_type {
        clauses.push(format!("document_type = {}", sql_literal(document_type)));
    }
    if let Some(ref source) = filters.source {
        clauses.push(format!("source = {}", sql_literal(source)));
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

/// L2 distance to a similarity score in (0, 1]
fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Semantic document retrieval over a LanceDB table
pub struct VectorSearch {
    connection: Connection,
    embedder: Arc<dyn EmbeddingService>,
    dimension: i32,
}

impl VectorSearch {
    pub async fn new(db_path: impl AsRef<Path>, embedder: Arc<dyn EmbeddingService>) -> Result<Self> {
        Self::with_dimension(db_path, embedder, DEFAULT_DIMENSION).await
    }

    pub async fn with_dimension(
        db_path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingService>,
        dimension: i32,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Initializing LanceDB at {:?}", db_path);

        let connection = lancedb::connect(db_path.to_string_lossy().as_ref())
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            connection,
            embedder,
            dimension,
        })
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("document_type", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, true),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ]))
    }

    async fn get_or_create_table(&self) -> Result<Table> {
        let table_names = self.connection.table_names().execute().await?;

        if table_names.iter().any(|name| name == TABLE_NAME) {
            debug!("Opening existing table: {}", TABLE_NAME);
            self.connection
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")
        } else {
            info!("Creating new table: {}", TABLE_NAME);
            let schema = self.schema();
            let batch = RecordBatch::new_empty(schema.clone());
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

            self.connection
                .create_table(TABLE_NAME, Box::new(batches))
                .execute()
                .await
                .context("Failed to create table")
        }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension as usize {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }
        Ok(())
    }

    /// Index a document with its passage embedding
    pub async fn index_document(&self, doc: &SearchDocument, embedding: Vec<f32>) -> Result<()> {
        self.check_dimension(&embedding)?;
        let table = self.get_or_create_table().await?;
        let schema = self.schema();

        let metadata = doc.metadata.as_ref().map(|m| m.to_string());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(Float32Array::from(embedding)),
            None,
        )?;

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![doc.id.as_str()])),
                Arc::new(StringArray::from(vec![doc.title.as_str()])),
                Arc::new(StringArray::from(vec![doc.content.as_str()])),
                Arc::new(StringArray::from(vec![doc.source.as_str()])),
                Arc::new(StringArray::from(vec![doc.document_type.as_str()])),
                Arc::new(StringArray::from(vec![doc.created_at.to_rfc3339()])),
                Arc::new(StringArray::from(vec![metadata.as_deref()])),
                Arc::new(vector_array),
            ],
        )?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table.add(Box::new(batches)).execute().await?;

        debug!("Indexed document: {}", doc.id);
        Ok(())
    }

    /// Nearest documents to an embedding, best first
    pub async fn search_embedding(
        &self,
        query_embedding: Vec<f32>,
        filters: &SearchFilters,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<DocumentHit>> {
        self.check_dimension(&query_embedding)?;
        let table = self.get_or_create_table().await?;

        let mut query = table.vector_search(query_embedding)?.limit(limit);
        if let Some(expression) = filter_expression(filters) {
            query = query.only_if(expression);
        }

        let batches: Vec<RecordBatch> = query.execute().await?.try_collect().await?;
        let mut hits = Vec::new();

        for batch in batches {
            let column = |name| string_column(&batch, name);
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

            if let (Some(ids), Some(titles), Some(contents), Some(sources), Some(types), Some(distances)) = (
                column("id"),
                column("title"),
                column("content"),
                column("source"),
                column("document_type"),
                distances,
            ) {
                for i in 0..batch.num_rows() {
                    let score = distance_to_score(distances.value(i));
                    if score < threshold {
                        continue;
                    }

                    hits.push(DocumentHit {
                        id: ids.value(i).to_string(),
                        title: titles.value(i).to_string(),
                        content: contents.value(i).to_string(),
                        score,
                        source: sources.value(i).to_string(),
                        document_type: types.value(i).to_string(),
                    });
                }
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn delete_document(&self, doc_id: &str) -> Result<()> {
        let table = self.get_or_create_table().await?;
        table.delete(&format!("id = {}", sql_literal(doc_id))).await?;
        debug!("Deleted document: {}", doc_id);
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.get_or_create_table().await?;
        Ok(table.count_rows(None).await?)
    }
}

#[async_trait]
impl SemanticSearch for VectorSearch {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        threshold: f32,
    ) -> datalive_kg::Result<Vec<DocumentHit>> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self
            .search_embedding(embedding, filters, limit, threshold)
            .await
            .map_err(|e| KgError::QueryError(format!("vector search failed: {:#}", e)))?;

        info!("Vector search returned {} results", hits.len());
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::DocumentType;
    use tempfile::tempdir;

    /// Deterministic 384-dim vectors: one hot on a slot chosen by text length
    struct SlotEmbedder;

    #[async_trait]
    impl EmbeddingService for SlotEmbedder {
        async fn embed(&self, text: &str) -> datalive_kg::Result<Vec<f32>> {
            let mut v = vec![0.0; DEFAULT_DIMENSION as usize];
            v[text.len() % DEFAULT_DIMENSION as usize] = 1.0;
            Ok(v)
        }
    }

    fn one_hot(slot: usize) -> Vec<f32> {
        let mut v = vec![0.0; DEFAULT_DIMENSION as usize];
        v[slot] = 1.0;
        v
    }

    #[test]
    fn test_filter_expression() {
        assert_eq!(filter_expression(&SearchFilters::default()), None);

        let filters = SearchFilters {
            document_type: Some("pdf".into()),
            source: Some("it's.pdf".into()),
        };
        assert_eq!(
            filter_expression(&filters).unwrap(),
            "document_type = 'pdf' AND source = 'it''s.pdf'"
        );
    }

    #[test]
    fn test_distance_to_score() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(1.0), 0.5);
        assert_eq!(distance_to_score(-0.1), 1.0);
    }

    #[tokio::test]
    async fn test_vector_search_creation() {
        let dir = tempdir().unwrap();
        let search = VectorSearch::new(dir.path(), Arc::new(SlotEmbedder)).await.unwrap();
        assert_eq!(search.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let dir = tempdir().unwrap();
        let search = VectorSearch::new(dir.path(), Arc::new(SlotEmbedder)).await.unwrap();

        let query = "What is DataLive?";
        let near = SearchDocument::new("Intro", "DataLive overview", "intro.md", DocumentType::Markdown);
        let far = SearchDocument::new("Other", "Unrelated text", "other.txt", DocumentType::Text);
        search.index_document(&near, one_hot(query.len())).await.unwrap();
        search.index_document(&far, one_hot(query.len() + 1)).await.unwrap();
        assert_eq!(search.count().await.unwrap(), 2);

        let hits = search
            .search(query, &SearchFilters::default(), 10, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, near.id);
        assert!(hits[0].score > hits[1].score);

        // The distant document falls below the threshold
        let hits = search
            .search(query, &SearchFilters::default(), 10, 0.9)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let filters = SearchFilters {
            document_type: Some("text".into()),
            source: None,
        };
        let hits = search.search(query, &filters, 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, far.id);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let search = VectorSearch::new(dir.path(), Arc::new(SlotEmbedder)).await.unwrap();
        let doc = SearchDocument::new("t", "c", "s", DocumentType::Text);
        assert!(search.index_document(&doc, vec![1.0; 3]).await.is_err());
    }
}
