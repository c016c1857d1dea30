//! Error types for the Tether system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TetherError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Malformed report: {0}")]
    MalformedReport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Owner context missing or invalid")]
    OwnerContext,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TetherResult<T> = Result<T, TetherError>;
