//! Error types shared by the config store, database layer and model backends.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("OPENAI_API_KEY not set in env or config")]
    MissingApiKey,

    #[error("{binary} is not installed. Please install it from {hint}")]
    MissingBinary { binary: String, hint: String },

    #[error("failed to start {binary} server: {message}")]
    ServerStart { binary: String, message: String },

    #[error("{binary} server failed to start within the expected time ({attempts} checks)")]
    ServerTimeout { binary: String, attempts: u32 },

    #[error("model API error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to run {binary}: {message}")]
    Process { binary: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
