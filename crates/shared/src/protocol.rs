use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Item, ItemId, ItemKind},
    error::ProtocolError,
};

/// REST header naming the client whose tree a request reads or mutates.
/// Its value matches the id in the client's `/ws/<clientId>` socket path.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Control messages the client sends over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { path: String },
}

impl ClientMessage {
    pub fn subscribe(path: impl Into<String>) -> Self {
        Self::Subscribe { path: path.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Added,
    Deleted,
    Renamed,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 3] = [Self::Added, Self::Deleted, Self::Renamed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Deleted => "DELETED",
            Self::Renamed => "RENAMED",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "ADDED" => Ok(Self::Added),
            "DELETED" => Ok(Self::Deleted),
            "RENAMED" => Ok(Self::Renamed),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// A change to one item inside the folder identified by `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireNotification", into = "WireNotification")]
pub enum Notification {
    Added { path: String, item: Item },
    Deleted { path: String, item_id: ItemId },
    Renamed { path: String, item: Item },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Added { .. } => NotificationKind::Added,
            Self::Deleted { .. } => NotificationKind::Deleted,
            Self::Renamed { .. } => NotificationKind::Renamed,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Deleted { path, .. } | Self::Renamed { path, .. } => {
                path
            }
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Added { item, .. } | Self::Renamed { item, .. } => &item.id,
            Self::Deleted { item_id, .. } => item_id,
        }
    }

    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        let wire: WireNotification = serde_json::from_str(frame)?;
        Self::try_from(wire)
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeletedPayload {
    #[serde(rename = "ItemId")]
    item_id: ItemId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireNotification {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    data: serde_json::Value,
}

impl TryFrom<WireNotification> for Notification {
    type Error = ProtocolError;

    fn try_from(wire: WireNotification) -> Result<Self, Self::Error> {
        let kind = wire.kind.parse::<NotificationKind>()?;
        let invalid = |source| ProtocolError::InvalidPayload { kind, source };
        let path = wire.path;
        Ok(match kind {
            NotificationKind::Added => Self::Added {
                path,
                item: serde_json::from_value(wire.data).map_err(invalid)?,
            },
            NotificationKind::Renamed => Self::Renamed {
                path,
                item: serde_json::from_value(wire.data).map_err(invalid)?,
            },
            NotificationKind::Deleted => {
                let payload: DeletedPayload =
                    serde_json::from_value(wire.data).map_err(invalid)?;
                Self::Deleted {
                    path,
                    item_id: payload.item_id,
                }
            }
        })
    }
}

impl From<Notification> for WireNotification {
    fn from(notification: Notification) -> Self {
        let kind = notification.kind().as_str().to_string();
        let (path, data) = match notification {
            Notification::Added { path, item } | Notification::Renamed { path, item } => {
                (path, serde_json::to_value(item).unwrap_or_default())
            }
            Notification::Deleted { path, item_id } => (
                path,
                serde_json::to_value(DeletedPayload { item_id }).unwrap_or_default(),
            ),
        };
        Self { kind, path, data }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameItemRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteItemResponse {
    pub message: String,
    pub item_id: ItemId,
}
