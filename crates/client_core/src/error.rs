use shared::{domain::ItemId, error::ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid server url `{url}`: {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("sync connection task has shut down")]
    Shutdown,
    #[error("listing fetch failed for folder {folder_id}: {cause:#}")]
    ListingFetch { folder_id: ItemId, cause: anyhow::Error },
    #[error("server rejected request with status {status}: {message}")]
    Rejected {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },
}
