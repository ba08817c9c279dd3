use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid bundle JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsigned bundle root must be a JSON object")]
    NotAnObject,
    #[error("missing {label}; provide explicit value or set {env}")]
    MissingKey { label: String, env: String },
    #[error("bundle carries no signature")]
    MissingSignature,
    #[error("policy bundle signature verification failed")]
    SignatureMismatch,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, BundleError>;
