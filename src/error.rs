use std::path::PathBuf;
use thiserror::Error;

/// The permission file could not be loaded. The bot refuses to start.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read permission file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed permission file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a command invocation did not complete.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command `{command}` is not allowed in this server")]
    PermissionDenied { command: String },
    #[error("unknown command `{input}`")]
    CommandNotFound { input: String },
    #[error("command `{command}` failed: {detail}")]
    CommandExecution { command: String, detail: String },
}

/// A single channel could not be read during backfill.
#[derive(Debug, Clone, Error)]
#[error("failed to scan channel {channel_name} ({channel_id}): {reason}")]
pub struct ChannelScanError {
    pub channel_id: u64,
    pub channel_name: String,
    pub reason: String,
}

/// Failure of the language-model or embedding service.
///
/// Returned to callers as a value so the event loop can answer with an
/// error message instead of dropping the request.
#[derive(Debug, Clone, Error)]
pub enum ExternalServiceError {
    #[error("language model request failed: {0}")]
    Completion(String),
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("embedding service returned no vector")]
    EmptyEmbedding,
    #[error("{service} request timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },
}
