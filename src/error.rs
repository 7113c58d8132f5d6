//! Error taxonomy for the sync pipeline.
//!
//! Every fallible operation in the library returns [`SyncError`]. The retry
//! wrapper consults [`SyncError::is_transient`] to decide between retrying
//! with backoff (dropped connections, pool timeouts, 5xx replies) and
//! propagating immediately (auth failures, malformed queries, bad state
//! files).

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("elasticsearch transport error: {0}")]
    Elastic(#[from] reqwest::Error),

    #[error("elasticsearch returned {status}: {body}")]
    ElasticStatus { status: StatusCode, body: String },

    #[error("elasticsearch rejected credentials ({status})")]
    Unauthorized { status: StatusCode },

    #[error("state file error: {0}")]
    State(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid watermark {value:?} in state file: {source}")]
    Watermark {
        value: String,
        source: chrono::ParseError,
    },
}

impl SyncError {
    /// Whether this error warrants a retry with backoff.
    ///
    /// Connectivity-class failures to either store are transient; everything
    /// else (auth, malformed queries, unreadable state files) is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Postgres(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            // Anything reqwest reports is transport-level by construction:
            // non-success HTTP replies are mapped to `ElasticStatus` before
            // they can reach this variant. A connection accepted and then
            // dropped mid-request or mid-body surfaces as a request/decode
            // error rather than a connect error, so those count too.
            SyncError::Elastic(err) => {
                err.is_connect() || err.is_timeout() || err.is_request() || has_io_source(err)
            }
            SyncError::ElasticStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            SyncError::Unauthorized { .. }
            | SyncError::State(_)
            | SyncError::Json(_)
            | SyncError::Watermark { .. } => false,
        }
    }
}

/// Whether an I/O error hides anywhere in the cause chain, as happens when
/// the peer resets the connection while the response body is being read.
fn has_io_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}
