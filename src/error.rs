//! Error types shared across the sampler.
use std::path::PathBuf;

/// A failure raised while producing the page sequence for a query.
///
/// Parsing never fails, so this is the only error a sample can end with.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The database rejected the query or the request.
    #[error("query rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The client could not be built or the endpoint could not be reached.
    #[error("connection failed for {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// Reading a page from the underlying source failed.
    #[error("failed to read page {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading or validating the TOML configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that abort a whole run (as opposed to failing one sample).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write results to {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize sample result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("virtual user task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
