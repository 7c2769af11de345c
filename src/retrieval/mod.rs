pub mod hybrid;
pub mod internal;
pub mod rerank;
pub mod store;
pub mod tagging;
pub mod types;
pub mod web;

use thiserror::Error;

use crate::embedding::EmbedError;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("knowledge store error: {0}")]
    Store(String),

    #[error("database error: {0}")]
    Postgres(#[from] postgres::Error),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("web search error: {0}")]
    Web(String),
}
