//! Run-level error type.

use thiserror::Error;

use crate::anilist::gateway::GatewayError;

/// Failures that stop a whole sync run or a CLI command.
///
/// Per-title problems never surface here; they are logged and reported instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no AniList access token configured; run `mangasync token set <TOKEN>` or set ANILIST_ACCESS_TOKEN")]
    MissingToken,

    #[error("access token invalid (HTTP {status}); it needs to be refreshed")]
    TokenInvalid { status: u16 },

    #[error("viewer lookup returned no user id")]
    ViewerUnavailable,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential store error: {0}")]
    Credentials(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("sync worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
