use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of the user's local projects.
pub trait ProjectStore: Send {
    fn list_project_ids(&self, user: &str) -> Result<Vec<ProjectId>>;
    fn project_name(&self, user: &str, id: ProjectId) -> Result<String>;
    fn project(&self, user: &str, id: ProjectId) -> Result<ProjectDescriptor>;
}

/// Produces the canonical serialized form of a project that is pushed remotely.
pub trait ProjectArchiver: Send {
    fn export_source(&self, user: &str, id: ProjectId) -> Result<Vec<u8>>;
}

/// Creates a new local project from downloaded remote content.
pub trait ProjectImporter: Send {
    fn import_project(&self, user: &str, name: &str, archive: &[u8]) -> Result<ProjectDescriptor>;
}

pub fn local_project_names(store: &dyn ProjectStore, user: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for id in store.list_project_ids(user)? {
        names.insert(store.project_name(user, id)?);
    }
    Ok(names)
}

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid project name regex"));

pub fn is_valid_project_name(name: &str) -> bool {
    PROJECT_NAME.is_match(name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectIndexDoc {
    version: u32,
    next_id: u64,
    projects: Vec<ProjectIndexEntry>,
}

impl Default for ProjectIndexDoc {
    fn default() -> Self {
        Self {
            version: 1,
            next_id: 1,
            projects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectIndexEntry {
    id: ProjectId,
    name: String,
    created_at: DateTime<Utc>,
}

impl ProjectIndexEntry {
    fn descriptor(&self) -> ProjectDescriptor {
        ProjectDescriptor {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
        }
    }
}

// Directory-backed project store:
//   <root>/<user>/projects.json   index of ids and names
//   <root>/<user>/<id>.archive    serialized project source
#[derive(Debug, Clone)]
pub struct DirProjectStore {
    root: PathBuf,
}

impl DirProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn user_dir(&self, user: &str) -> Result<PathBuf> {
        let safe = !user.is_empty()
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
            && user != "."
            && user != "..";
        if !safe {
            return Err(Error::store(format!("invalid user id '{user}'")));
        }
        Ok(self.root.join(user))
    }

    fn index_path(&self, user: &str) -> Result<PathBuf> {
        Ok(self.user_dir(user)?.join("projects.json"))
    }

    pub fn archive_path(&self, user: &str, id: ProjectId) -> Result<PathBuf> {
        Ok(self.user_dir(user)?.join(format!("{id}.archive")))
    }

    fn load_index(&self, user: &str) -> Result<ProjectIndexDoc> {
        let p = self.index_path(user)?;
        let raw = match fs::read_to_string(&p) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ProjectIndexDoc::default()),
            Err(e) => {
                return Err(Error::io(format!("failed to read project index {}", p.display()), e));
            }
        };
        serde_json::from_str(&raw).map_err(|e| {
            Error::store(format!("corrupt project index {}: {e}", p.display()))
        })
    }

    fn save_index(&self, user: &str, idx: &ProjectIndexDoc) -> Result<()> {
        let p = self.index_path(user)?;
        let body = serde_json::to_vec_pretty(idx)
            .map_err(|e| Error::store(format!("failed to encode project index: {e}")))?;
        atomic_write(&p, &body)
    }

    fn entry(&self, user: &str, id: ProjectId) -> Result<ProjectIndexEntry> {
        self.load_index(user)?
            .projects
            .into_iter()
            .find(|p| p.id == id)
            .ok_or(Error::NotFound(id))
    }

    pub fn create_project(&self, user: &str, name: &str, source: &[u8]) -> Result<ProjectDescriptor> {
        if !is_valid_project_name(name) {
            return Err(Error::import(name, "invalid project name"));
        }
        let _lock = acquire_user_lock(&self.user_dir(user)?)?;
        let mut idx = self.load_index(user)?;
        if idx.projects.iter().any(|p| p.name == name) {
            return Err(Error::import(name, "a project with this name already exists"));
        }

        let entry = ProjectIndexEntry {
            id: ProjectId(idx.next_id),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        atomic_write(&self.archive_path(user, entry.id)?, source)?;
        idx.next_id = idx.next_id.saturating_add(1);
        idx.projects.push(entry.clone());
        self.save_index(user, &idx)?;
        Ok(entry.descriptor())
    }

    pub fn write_source(&self, user: &str, id: ProjectId, source: &[u8]) -> Result<()> {
        self.entry(user, id)?;
        atomic_write(&self.archive_path(user, id)?, source)
    }
}

impl ProjectStore for DirProjectStore {
    fn list_project_ids(&self, user: &str) -> Result<Vec<ProjectId>> {
        Ok(self.load_index(user)?.projects.iter().map(|p| p.id).collect())
    }

    fn project_name(&self, user: &str, id: ProjectId) -> Result<String> {
        Ok(self.entry(user, id)?.name)
    }

    fn project(&self, user: &str, id: ProjectId) -> Result<ProjectDescriptor> {
        Ok(self.entry(user, id)?.descriptor())
    }
}

impl ProjectArchiver for DirProjectStore {
    fn export_source(&self, user: &str, id: ProjectId) -> Result<Vec<u8>> {
        let entry = self.entry(user, id)?;
        let path = self.archive_path(user, id)?;
        let bytes = fs::read(&path)
            .map_err(|e| Error::archive(&entry.name, format!("read {}: {e}", path.display())))?;
        if bytes.is_empty() {
            return Err(Error::archive(&entry.name, "project source is empty"));
        }
        Ok(bytes)
    }
}

impl ProjectImporter for DirProjectStore {
    fn import_project(&self, user: &str, name: &str, archive: &[u8]) -> Result<ProjectDescriptor> {
        if archive.is_empty() {
            return Err(Error::import(name, "downloaded archive is empty"));
        }
        self.create_project(user, name, archive)
    }
}

fn atomic_write(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::store(format!("invalid path for atomic write: {}", path.display())))?;
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::write(&tmp, body)
        .map_err(|e| Error::io(format!("failed to write temp file {}", tmp.display()), e))?;
    fs::rename(&tmp, path).map_err(|e| {
        Error::io(
            format!("failed to rename {} -> {}", tmp.display(), path.display()),
            e,
        )
    })
}

struct UserLock {
    path: PathBuf,
}

impl Drop for UserLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// Serializes index mutations between processes sharing a store root (e.g. `watch` and `import`).
fn acquire_user_lock(user_dir: &Path) -> Result<UserLock> {
    fs::create_dir_all(user_dir)
        .map_err(|e| Error::io(format!("failed to create {}", user_dir.display()), e))?;
    let path = user_dir.join(".index.lock");
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => return Ok(UserLock { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if Instant::now() >= deadline {
                    return Err(Error::store(format!(
                        "timed out waiting for project index lock {}",
                        path.display()
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(Error::io(
                    format!("failed to acquire project index lock {}", path.display()),
                    e,
                ));
            }
        }
    }
}
