//! Semantic retrieval backend
//!
//! Documents are embedded with a local fastembed model and stored in LanceDB.
//! [`VectorSearch`] implements [`SemanticSearch`](crate::services::SemanticSearch);
//! [`FastEmbedder`] also serves as the cache's embedding collaborator.

pub mod embedding;
pub mod types;
pub mod vector;

pub use embedding::FastEmbedder;
pub use types::{DocumentType, SearchDocument};
pub use vector::VectorSearch;
