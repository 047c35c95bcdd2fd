use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod drive;
pub mod memory;

pub use drive::DriveClient;
pub use memory::MemoryRemote;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl RemoteObject {
    // Objects with several parents are not considered part of the backup folder.
    pub fn sole_parent_is(&self, folder_id: &str) -> bool {
        self.parents.len() == 1 && self.parents[0] == folder_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectQuery {
    pub mime_type: Option<String>,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub include_trashed: bool,
}

impl ObjectQuery {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn matches(&self, obj: &RemoteObject) -> bool {
        (self.include_trashed || !obj.trashed)
            && self.mime_type.as_ref().is_none_or(|m| *m == obj.mime_type)
            && self.name.as_ref().is_none_or(|n| *n == obj.name)
            && self.parent.as_ref().is_none_or(|p| obj.parents.contains(p))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    pub name: String,
    pub mime_type: String,
    pub parents: Vec<String>,
}

/// Primitive operations of the remote object store. Every call is an independent request
/// that either succeeds or fails; a failure says nothing about whether an object exists.
pub trait RemoteStore: Send {
    fn list(&self, query: &ObjectQuery) -> Result<Vec<RemoteObject>>;
    fn create(&self, object: &NewObject, media: Option<&[u8]>) -> Result<RemoteObject>;
    fn update(&self, id: &str, name: &str, mime_type: &str, media: &[u8]) -> Result<RemoteObject>;
    fn download(&self, id: &str) -> Result<Vec<u8>>;
}
