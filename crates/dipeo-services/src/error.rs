//! Service-layer error taxonomy (spec §4.2, §4.11 `ConfigurationError`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("api key '{0}' not found")]
    ApiKeyNotFound(String),

    #[error("path '{0}' escapes the service's base directory")]
    PathTraversal(String),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("template render error: {0}")]
    Template(String),

    #[error("llm provider error: {0}")]
    Llm(String),

    #[error("sub-diagram error: {0}")]
    SubDiagram(String),

    #[error("service '{0}' is not registered")]
    NotRegistered(String),
}
