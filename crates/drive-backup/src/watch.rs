use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{DirProjectStore, ProjectId, ProjectStore};

/// Detects edited projects in a directory store by hashing each project's source between polls.
#[derive(Debug, Default)]
pub struct ChangeWatcher {
    digests: BTreeMap<ProjectId, String>,
}

impl ChangeWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids whose source changed since the previous poll. Projects seen for the first time count
    /// as changed.
    pub fn poll(&mut self, store: &DirProjectStore, user: &str) -> Result<Vec<ProjectId>> {
        let ids = store.list_project_ids(user)?;
        let mut next = BTreeMap::new();
        let mut dirty = Vec::new();

        for id in ids {
            let path = store.archive_path(user, id)?;
            if !path.is_file() {
                continue;
            }
            let digest = sha256_file_hex(&path)?;
            if self.digests.get(&id) != Some(&digest) {
                dirty.push(id);
            }
            next.insert(id, digest);
        }
        if !dirty.is_empty() {
            debug!(user, ids = ?dirty, "projects changed on disk");
        }
        self.digests = next;
        Ok(dirty)
    }
}

fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = fs::File::open(path)
        .map_err(|e| Error::io(format!("failed to open {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_new_then_only_edited_projects() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = DirProjectStore::new(tmp.path());
        let a = store.create_project("alice", "Foo", b"a1").expect("create");
        let b = store.create_project("alice", "Bar", b"b1").expect("create");

        let mut w = ChangeWatcher::new();
        assert_eq!(w.poll(&store, "alice").expect("poll"), vec![a.id, b.id]);
        assert!(w.poll(&store, "alice").expect("poll").is_empty());

        store.write_source("alice", b.id, b"b2").expect("edit");
        assert_eq!(w.poll(&store, "alice").expect("poll"), vec![b.id]);

        // Rewriting identical bytes is not a change.
        store.write_source("alice", a.id, b"a1").expect("rewrite");
        assert!(w.poll(&store, "alice").expect("poll").is_empty());
    }
}
