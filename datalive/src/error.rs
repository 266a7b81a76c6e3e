//! Errors surfaced by the query path
//!
//! Collaborator failures never reach callers of
//! [`ResultCombiner::process_query`](crate::combiner::ResultCombiner::process_query);
//! they degrade the answer instead. Only requests that cannot be processed at
//! all produce a [`QueryError`].

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Structurally invalid request (empty or oversized query text)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller abandoned the request before it completed
    #[error("Request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, QueryError>;
