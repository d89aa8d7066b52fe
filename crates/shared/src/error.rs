use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::NotificationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Why an inbound frame could not be turned into a notification.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown notification kind `{0}`")]
    UnknownKind(String),
    #[error("invalid {kind:?} payload: {source}")]
    InvalidPayload {
        kind: NotificationKind,
        source: serde_json::Error,
    },
}
