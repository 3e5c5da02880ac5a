use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by an overlay job.
///
/// Missing or non-scalar metadata keys are not errors: `add_value` skips them.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("metadata has not been prepared; call prepare() before {operation}")]
    NotPrepared { operation: &'static str },

    #[error("invalid font for {path}: {message}")]
    InvalidFont { path: PathBuf, message: String },

    #[error("invalid layout option '{field}': {message}")]
    InvalidOptions {
        field: &'static str,
        message: String,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;
