use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of the root folder. Root children carry it as their parent id.
pub const ROOT_FOLDER_ID: &str = "ROOT";
/// Owner of requests that do not name a client. Sockets opened as
/// `/ws/default` see its tree.
pub const DEFAULT_CLIENT_ID: &str = "default";
/// Deepest allowed nesting level; root children sit at depth 0.
pub const MAX_FOLDER_DEPTH: u8 = 5;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ItemId);
id_newtype!(ClientId);

impl ItemId {
    pub fn root() -> Self {
        Self(ROOT_FOLDER_ID.to_string())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_FOLDER_ID
    }
}

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self(DEFAULT_CLIENT_ID.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Folder => "FOLDER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("folder") {
            Some(Self::Folder)
        } else if raw.eq_ignore_ascii_case("file") {
            Some(Self::File)
        } else {
            None
        }
    }
}

/// One entry of a folder listing.
///
/// `id` is stable across renames; `name` is unique among siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "ItemId")]
    pub id: ItemId,
    #[serde(rename = "ParentId")]
    pub parent_id: ItemId,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: ItemKind,
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "Depth", default)]
    pub depth: u8,
}

impl Item {
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Path of the folder this item lives in, i.e. the subscription key its
    /// notifications are tagged with.
    pub fn folder_path(&self) -> &str {
        parent_path(&self.path)
    }
}

/// A folder the client can navigate to: its id for listing fetches and its
/// path for subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderRef {
    pub id: ItemId,
    pub path: String,
}

impl FolderRef {
    pub fn root() -> Self {
        Self {
            id: ItemId::root(),
            path: String::new(),
        }
    }

    pub fn new(id: ItemId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        item.is_folder().then(|| Self {
            id: item.id.clone(),
            path: item.path.clone(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }
}

pub fn join_path(folder_path: &str, name: &str) -> String {
    if folder_path.is_empty() {
        name.to_string()
    } else {
        format!("{folder_path}/{name}")
    }
}

pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
