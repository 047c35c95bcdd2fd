use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

mod sections;

pub use sections::{BackupConfig, DriveConfig, StoreConfig};

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn parse(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let value: Value = toml::from_str(raw)?;
        Ok(Self {
            path: path.into(),
            value,
        })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid config section '{path}': {e}")))?;
        Ok(Some(parsed))
    }

    pub fn backup(&self) -> Result<BackupConfig> {
        let cfg: BackupConfig = self.deserialize_path("backup")?.unwrap_or_default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn drive(&self) -> Result<DriveConfig> {
        Ok(self.deserialize_path("drive")?.unwrap_or_default())
    }

    pub fn store(&self) -> Result<StoreConfig> {
        let mut cfg: StoreConfig = self.deserialize_path("store")?.unwrap_or_default();
        // Relative store roots follow the config file, not the cwd.
        let root = PathBuf::from(&cfg.root_dir);
        if root.is_relative() {
            cfg.root_dir = relative_to(&self.path, &cfg.root_dir)
                .to_string_lossy()
                .into_owned();
        }
        Ok(cfg)
    }
}

/// Deep-merges `overlay` into `base`: tables merge key by key, any other value replaces.
pub fn merge(base: &mut Value, overlay: Value) {
    let Value::Table(src) = overlay else {
        *base = overlay;
        return;
    };
    let Value::Table(dst) = &mut *base else {
        *base = Value::Table(src);
        return;
    };
    for (key, value) in src {
        match dst.get_mut(&key) {
            Some(slot) => merge(slot, value),
            None => {
                dst.insert(key, value);
            }
        }
    }
}

/// Path referenced from inside `config_file`; relative references follow that file.
fn relative_to(config_file: &Path, reference: &str) -> PathBuf {
    let p = Path::new(reference);
    match config_file.parent() {
        Some(dir) if p.is_relative() => dir.join(p),
        _ => p.to_path_buf(),
    }
}

// Resolves `extends` (one parent, root only) and `imports` (any table level) into a single
// document. `chain` holds the files currently being loaded.
struct Loader {
    chain: Vec<PathBuf>,
}

impl Loader {
    fn load(&mut self, path: &Path) -> Result<Value> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.chain.contains(&key) {
            let cycle: Vec<String> = self
                .chain
                .iter()
                .chain(std::iter::once(&key))
                .map(|p| p.display().to_string())
                .collect();
            return Err(Error::config(format!(
                "config import cycle: {}",
                cycle.join(" -> ")
            )));
        }
        self.chain.push(key);
        let loaded = self.load_layers(path);
        self.chain.pop();
        loaded
    }

    fn load_layers(&mut self, path: &Path) -> Result<Value> {
        let data = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
        let mut own: Value = toml::from_str(&data)
            .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

        let parent = match own.as_table_mut().and_then(|t| t.remove("extends")) {
            None => None,
            Some(Value::String(parent)) => Some(parent),
            Some(other) => {
                return Err(Error::config(format!(
                    "'extends' in {} must be a path, got {}",
                    path.display(),
                    other.type_str()
                )));
            }
        };
        let mut doc = match parent {
            Some(parent) => self.load(&relative_to(path, &parent))?,
            None => Value::Table(Default::default()),
        };

        self.inline_imports(path, &mut own)?;
        merge(&mut doc, own);
        Ok(doc)
    }

    // Imported files form the base of the table that lists them; the table's own keys win.
    fn inline_imports(&mut self, file: &Path, value: &mut Value) -> Result<()> {
        let Value::Table(tbl) = &mut *value else {
            return Ok(());
        };
        let imports = import_list(file, tbl.remove("imports"))?;
        if !imports.is_empty() {
            let mut base = Value::Table(Default::default());
            for imp in &imports {
                merge(&mut base, self.load(&relative_to(file, imp))?);
            }
            merge(&mut base, Value::Table(std::mem::take(tbl)));
            *value = base;
        }

        if let Value::Table(tbl) = &mut *value {
            for child in tbl.iter_mut().map(|(_, v)| v) {
                self.inline_imports(file, child)?;
            }
        }
        Ok(())
    }
}

fn import_list(file: &Path, raw: Option<Value>) -> Result<Vec<String>> {
    let entries = match raw {
        None => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(Error::config(format!(
                "'imports' in {} must be an array of paths",
                file.display()
            )));
        }
    };
    entries
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(Ok(s.trim().to_string())),
            _ => Some(Err(Error::config(format!(
                "invalid imports entry in {} (expected string)",
                file.display()
            )))),
        })
        .collect()
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let value = Loader { chain: Vec::new() }.load(path)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extends_and_imports_merge_in_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("base.toml"),
            "[backup]\nfolder_name = \"base-folder\"\nautosave_window_ms = 1000\n",
        )
        .expect("write base");
        fs::write(
            tmp.path().join("drive.toml"),
            "base_url = \"http://127.0.0.1:9/drive\"\ntoken_env = \"TEST_DRIVE_TOKEN\"\n",
        )
        .expect("write drive");
        fs::write(
            tmp.path().join("main.toml"),
            "extends = \"base.toml\"\n[backup]\nautosave_window_ms = 2500\n[drive]\nimports = [\"drive.toml\"]\ntimeout_secs = 5\n",
        )
        .expect("write main");

        let doc = load(&tmp.path().join("main.toml")).expect("load");
        let backup = doc.backup().expect("backup");
        assert_eq!(backup.folder_name, "base-folder");
        assert_eq!(backup.autosave_window_ms, 2500);

        let drive = doc.drive().expect("drive");
        assert_eq!(drive.base_url, "http://127.0.0.1:9/drive");
        assert_eq!(drive.token_env.as_deref(), Some("TEST_DRIVE_TOKEN"));
        assert_eq!(drive.timeout_secs, 5);
    }

    #[test]
    fn import_cycle_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a.toml"), "imports = [\"b.toml\"]\n").expect("write a");
        fs::write(tmp.path().join("b.toml"), "imports = [\"a.toml\"]\n").expect("write b");
        let err = load(&tmp.path().join("a.toml")).expect_err("cycle");
        assert!(matches!(err, Error::Config(_)));
        let msg = err.to_string();
        assert!(msg.contains("cycle"));
        assert_eq!(msg.matches(" -> ").count(), 2);
    }

    #[test]
    fn malformed_extends_and_imports_are_config_errors() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a.toml"), "extends = 3
").expect("write a");
        fs::write(tmp.path().join("b.toml"), "[drive]
imports = \"drive.toml\"
").expect("write b");
        for f in ["a.toml", "b.toml", "missing.toml"] {
            let err = load(&tmp.path().join(f)).expect_err(f);
            assert!(matches!(err, Error::Config(_)), "{f}: {err}");
        }
    }

    #[test]
    fn merge_replaces_scalars_and_joins_tables() {
        let mut base: Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2\n").expect("base");
        let over: Value = toml::from_str("a = \"s\"\n[t]\ny = 3\nz = 4\n").expect("over");
        merge(&mut base, over);
        assert_eq!(base["a"].as_str(), Some("s"));
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(3));
        assert_eq!(base["t"]["z"].as_integer(), Some(4));
    }

    #[test]
    fn store_root_is_relative_to_config_file() {
        let doc = ConfigDoc::parse("/etc/drive-backup/config.toml", "[store]\nroot_dir = \"projects\"\n")
            .expect("parse");
        let store = doc.store().expect("store");
        assert_eq!(store.root_dir, "/etc/drive-backup/projects");
    }
}
