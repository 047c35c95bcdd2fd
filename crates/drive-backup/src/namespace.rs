use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::error::Result;
use crate::remote::{FOLDER_MIME_TYPE, NewObject, ObjectQuery, RemoteStore};

pub fn with_suffix(name: &str, suffix: &str) -> String {
    if name.ends_with(suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

pub fn strip_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    name.strip_suffix(suffix).unwrap_or(name)
}

/// Resolves the backup folder and the archive objects inside it.
///
/// Nothing is cached between calls: other devices (or the user) may change the folder at any
/// time, so every lookup reflects a fresh listing. Listing failures are returned as
/// `Error::Remote` and are never reported as "absent".
pub struct RemoteNamespace<'a> {
    remote: &'a dyn RemoteStore,
    folder_name: &'a str,
    suffix: &'a str,
}

impl<'a> RemoteNamespace<'a> {
    pub fn new(remote: &'a dyn RemoteStore, cfg: &'a BackupConfig) -> Self {
        Self {
            remote,
            folder_name: &cfg.folder_name,
            suffix: &cfg.archive_suffix,
        }
    }

    pub fn suffix(&self) -> &str {
        self.suffix
    }

    pub fn find_folder(&self) -> Result<Option<String>> {
        let query = ObjectQuery::live()
            .mime_type(FOLDER_MIME_TYPE)
            .name(self.folder_name);
        let folders: Vec<_> = self
            .remote
            .list(&query)?
            .into_iter()
            .filter(|o| !o.trashed && o.mime_type == FOLDER_MIME_TYPE && o.name == self.folder_name)
            .collect();
        if folders.len() > 1 {
            // Two clients racing on creation can leave duplicates; the first listed one wins.
            warn!(
                folder = self.folder_name,
                count = folders.len(),
                chosen = %folders[0].id,
                "multiple backup folders found"
            );
        }
        Ok(folders.into_iter().next().map(|f| f.id))
    }

    pub fn resolve_folder(&self) -> Result<String> {
        if let Some(id) = self.find_folder()? {
            return Ok(id);
        }
        let created = self.remote.create(
            &NewObject {
                name: self.folder_name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                parents: Vec::new(),
            },
            None,
        )?;
        info!(folder = self.folder_name, folder_id = %created.id, "created backup folder");
        Ok(created.id)
    }

    pub fn find_object_by_name(&self, folder_id: &str, name: &str) -> Result<Option<String>> {
        let query = ObjectQuery::live().name(name).parent(folder_id);
        let mut matches = self
            .remote
            .list(&query)?
            .into_iter()
            .filter(|o| !o.trashed && o.name == name && o.sole_parent_is(folder_id));
        let first = matches.next();
        if first.is_some() && matches.next().is_some() {
            warn!(name, folder_id, "several remote objects share one name; using the first");
        }
        Ok(first.map(|o| o.id))
    }

    pub fn list_object_names(
        &self,
        folder_id: &str,
        with_suffix: bool,
    ) -> Result<BTreeMap<String, String>> {
        let objects = self.remote.list(&ObjectQuery::live().parent(folder_id))?;
        let mut out = BTreeMap::new();
        for o in objects {
            if o.trashed || !o.sole_parent_is(folder_id) || !o.name.ends_with(self.suffix) {
                continue;
            }
            let key = if with_suffix {
                o.name.clone()
            } else {
                strip_suffix(&o.name, self.suffix).to_string()
            };
            if key.is_empty() {
                continue;
            }
            match out.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(o.id);
                }
                Entry::Occupied(slot) => {
                    warn!(name = %slot.key(), kept = %slot.get(), ignored = %o.id, "duplicate remote archive name");
                }
            }
        }
        Ok(out)
    }
}
