use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{FOLDER_MIME_TYPE, NewObject, ObjectQuery, RemoteObject, RemoteStore};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub create: usize,
    pub update: usize,
    pub download: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.list + self.create + self.update + self.download
    }
}

#[derive(Debug)]
struct StoredObject {
    meta: RemoteObject,
    media: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    objects: Vec<StoredObject>,
    calls: CallCounts,
    fail_list: bool,
    fail_writes_for: BTreeSet<String>,
    fail_downloads_for: BTreeSet<String>,
}

impl MemoryState {
    fn alloc_id(&mut self) -> String {
        self.next_id += 1;
        format!("obj-{}", self.next_id)
    }
}

/// In-process remote namespace with failure injection. Clones share the same state, so a test
/// can hand one clone to a session and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the namespace from the assertions that follow.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, name: &str, mime_type: &str, parents: &[&str], media: &[u8]) -> String {
        let mut s = self.state();
        let id = s.alloc_id();
        s.objects.push(StoredObject {
            meta: RemoteObject {
                id: id.clone(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                parents: parents.iter().map(|p| p.to_string()).collect(),
                trashed: false,
            },
            media: media.to_vec(),
        });
        id
    }

    pub fn insert_folder(&self, name: &str) -> String {
        self.insert(name, FOLDER_MIME_TYPE, &[], &[])
    }

    pub fn trash(&self, id: &str) {
        if let Some(o) = self.state().objects.iter_mut().find(|o| o.meta.id == id) {
            o.meta.trashed = true;
        }
    }

    pub fn objects(&self) -> Vec<RemoteObject> {
        self.state().objects.iter().map(|o| o.meta.clone()).collect()
    }

    pub fn objects_named(&self, name: &str) -> Vec<RemoteObject> {
        self.objects()
            .into_iter()
            .filter(|o| o.name == name && !o.trashed)
            .collect()
    }

    pub fn media(&self, id: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .iter()
            .find(|o| o.meta.id == id)
            .map(|o| o.media.clone())
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn fail_writes_to(&self, name: &str) {
        self.state().fail_writes_for.insert(name.to_string());
    }

    pub fn fail_downloads_of(&self, id: &str) {
        self.state().fail_downloads_for.insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut s = self.state();
        s.fail_list = false;
        s.fail_writes_for.clear();
        s.fail_downloads_for.clear();
    }
}

impl RemoteStore for MemoryRemote {
    fn list(&self, query: &ObjectQuery) -> Result<Vec<RemoteObject>> {
        let mut s = self.state();
        s.calls.list += 1;
        if s.fail_list {
            return Err(Error::remote("list", "injected listing failure"));
        }
        Ok(s.objects
            .iter()
            .filter(|o| query.matches(&o.meta))
            .map(|o| o.meta.clone())
            .collect())
    }

    fn create(&self, object: &NewObject, media: Option<&[u8]>) -> Result<RemoteObject> {
        let mut s = self.state();
        s.calls.create += 1;
        if s.fail_writes_for.contains(&object.name) {
            return Err(Error::remote("create", format!("injected failure for '{}'", object.name)));
        }
        let id = s.alloc_id();
        let meta = RemoteObject {
            id,
            name: object.name.clone(),
            mime_type: object.mime_type.clone(),
            parents: object.parents.clone(),
            trashed: false,
        };
        s.objects.push(StoredObject {
            meta: meta.clone(),
            media: media.map(<[u8]>::to_vec).unwrap_or_default(),
        });
        Ok(meta)
    }

    fn update(&self, id: &str, name: &str, mime_type: &str, media: &[u8]) -> Result<RemoteObject> {
        let mut s = self.state();
        s.calls.update += 1;
        if s.fail_writes_for.contains(name) {
            return Err(Error::remote("update", format!("injected failure for '{name}'")));
        }
        let Some(obj) = s.objects.iter_mut().find(|o| o.meta.id == id) else {
            return Err(Error::remote("update", format!("status 404 Not Found: file {id}")));
        };
        obj.meta.name = name.to_string();
        obj.meta.mime_type = mime_type.to_string();
        obj.media = media.to_vec();
        Ok(obj.meta.clone())
    }

    fn download(&self, id: &str) -> Result<Vec<u8>> {
        let mut s = self.state();
        s.calls.download += 1;
        if s.fail_downloads_for.contains(id) {
            return Err(Error::remote("download", format!("injected failure for {id}")));
        }
        s.objects
            .iter()
            .find(|o| o.meta.id == id)
            .map(|o| o.media.clone())
            .ok_or_else(|| Error::remote("download", format!("status 404 Not Found: file {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_trashed_and_parents() {
        let remote = MemoryRemote::new();
        let folder = remote.insert_folder("backup");
        let a = remote.insert("A.aia", "application/zip", &[&folder], b"a");
        let b = remote.insert("B.aia", "application/zip", &[&folder], b"b");
        remote.trash(&b);

        let live = remote
            .list(&ObjectQuery::live().parent(folder.clone()))
            .expect("list");
        assert_eq!(live.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(), vec![a.as_str()]);
        assert_eq!(remote.calls().list, 1);
    }

    #[test]
    fn injected_failures_are_remote_errors() {
        let remote = MemoryRemote::new();
        remote.fail_listing(true);
        assert!(remote.list(&ObjectQuery::live()).expect_err("fail").is_remote());
        remote.clear_failures();
        assert!(remote.list(&ObjectQuery::live()).expect("ok").is_empty());
    }
}
