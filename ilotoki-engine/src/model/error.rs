//! Error types for model acquisition and inference

use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Network or I/O failure while downloading the model file.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server answered {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("connection closed after {downloaded} of {expected} bytes")]
    Truncated { downloaded: u64, expected: u64 },

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The model file could not be turned into an inference session.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("model file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("inference backend unavailable")]
    Backend(#[source] BoxError),

    #[error("model load failed")]
    Model(#[source] BoxError),
}

/// Failure while producing tokens for a prompt.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("tokenization failed")]
    Tokenize(#[source] BoxError),

    #[error("prompt of {tokens} tokens does not fit a context of {n_ctx}")]
    PromptTooLong { tokens: usize, n_ctx: u32 },

    #[error("context creation failed")]
    Context(#[source] BoxError),

    #[error("decode failed")]
    Decode(#[source] BoxError),
}

/// Failure of a whole acquisition run (download + load, after the automatic retry).
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("model directory {} could not be prepared", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("an acquisition is already in progress")]
    InProgress,

    #[error("the model was released while it was being acquired")]
    Released,
}

/// A variant id that is not present in `models.toml`.
#[derive(Debug, thiserror::Error)]
#[error("unknown model variant: '{0}'")]
pub struct UnknownVariant(pub String);

/// Render an error together with its source chain, e.g.
/// `request to https://… failed: connection refused`.
pub fn report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
