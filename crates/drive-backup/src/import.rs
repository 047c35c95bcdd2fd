use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::namespace::{RemoteNamespace, strip_suffix};
use crate::session::Session;
use crate::store::{ProjectDescriptor, ProjectImporter, ProjectStore, local_project_names};

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<ProjectDescriptor>,
    // Remote names that already exist locally; the local project always keeps the name.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

pub struct ImportReconciler<'a> {
    session: &'a Session,
    cfg: &'a BackupConfig,
    store: &'a dyn ProjectStore,
    importer: &'a dyn ProjectImporter,
}

impl<'a> ImportReconciler<'a> {
    pub fn new(
        session: &'a Session,
        cfg: &'a BackupConfig,
        store: &'a dyn ProjectStore,
        importer: &'a dyn ProjectImporter,
    ) -> Self {
        Self {
            session,
            cfg,
            store,
            importer,
        }
    }

    /// Imports a single remote archive. `Ok(None)` means a local project already uses the name
    /// and the remote store was not contacted.
    pub fn try_import_one(&self, remote_id: &str, name: &str) -> Result<Option<ProjectDescriptor>> {
        let user = self.session.user();
        let name = strip_suffix(name, &self.cfg.archive_suffix);
        if local_project_names(self.store, user)?.contains(name) {
            debug!(name, "local project already exists; skipping import");
            return Ok(None);
        }
        let archive = self.session.remote().download(remote_id)?;
        let project = self.importer.import_project(user, name, &archive)?;
        info!(name, remote_id, project_id = %project.id, "imported project from backup");
        Ok(Some(project))
    }

    pub fn import_one(&self, remote_id: &str, name: &str) -> Option<ProjectDescriptor> {
        match self.try_import_one(remote_id, name) {
            Ok(imported) => imported,
            Err(e) => {
                warn!(name, remote_id, error = %e, "project import failed");
                None
            }
        }
    }

    /// Suffix-stripped archive names in the backup folder mapped to their remote ids. A missing
    /// folder yields an empty map; it is not created here.
    pub fn remote_names(&self, with_suffix: bool) -> Result<BTreeMap<String, String>> {
        let ns = RemoteNamespace::new(self.session.remote(), self.cfg);
        match ns.find_folder()? {
            Some(folder_id) => ns.list_object_names(&folder_id, with_suffix),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn remote_projects(&self) -> Result<BTreeMap<String, String>> {
        self.remote_names(true)
    }

    pub fn import_all(&self) -> Result<ImportReport> {
        let remote = self.remote_names(false)?;
        let local = local_project_names(self.store, self.session.user())?;

        let mut report = ImportReport::default();
        for (name, remote_id) in remote {
            if local.contains(&name) {
                report.skipped.push(name);
                continue;
            }
            match self.try_import_one(&remote_id, &name) {
                Ok(Some(project)) => report.imported.push(project),
                Ok(None) => report.skipped.push(name),
                Err(e) => {
                    warn!(name = %name, remote_id = %remote_id, error = %e, "project import failed");
                    report.failed.push((name, e));
                }
            }
        }
        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "import from backup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::store::{DirProjectStore, ProjectArchiver};

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: DirProjectStore,
        remote: MemoryRemote,
        session: Session,
        cfg: BackupConfig,
        folder: String,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = DirProjectStore::new(tmp.path());
        let remote = MemoryRemote::new();
        let cfg = BackupConfig::default();
        let folder = remote.insert_folder(&cfg.folder_name);
        let session = Session::with_remote("alice", remote.clone());
        Fixture {
            _tmp: tmp,
            store,
            remote,
            session,
            cfg,
            folder,
        }
    }

    #[test]
    fn import_all_skips_names_that_exist_locally() {
        let f = fixture();
        f.remote.insert("Foo.aia", "application/zip", &[&f.folder], b"remote-foo");
        f.remote.insert("Bar.aia", "application/zip", &[&f.folder], b"remote-bar");
        let local_foo = f.store.create_project("alice", "Foo", b"local-foo").expect("create");

        let imp = ImportReconciler::new(&f.session, &f.cfg, &f.store, &f.store);
        let report = imp.import_all().expect("import");
        assert_eq!(
            report.imported.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Bar"]
        );
        assert_eq!(report.skipped, vec!["Foo".to_string()]);
        assert_eq!(
            f.store.export_source("alice", local_foo.id).expect("export"),
            b"local-foo"
        );

        let again = imp.import_all().expect("second import");
        assert!(again.imported.is_empty());
        assert_eq!(again.skipped.len(), 2);
    }

    #[test]
    fn import_one_with_local_duplicate_never_contacts_remote() {
        let f = fixture();
        let id = f.remote.insert("Foo.aia", "application/zip", &[&f.folder], b"x");
        f.store.create_project("alice", "Foo", b"local").expect("create");
        let before = f.remote.calls();

        let imp = ImportReconciler::new(&f.session, &f.cfg, &f.store, &f.store);
        assert_eq!(imp.import_one(&id, "Foo.aia"), None);
        assert_eq!(f.remote.calls(), before);
    }

    #[test]
    fn one_failed_download_does_not_abort_the_batch() {
        let f = fixture();
        let bad = f.remote.insert("Bad.aia", "application/zip", &[&f.folder], b"x");
        f.remote.insert("Good.aia", "application/zip", &[&f.folder], b"y");
        f.remote.insert("Empty.aia", "application/zip", &[&f.folder], b"");
        f.remote.fail_downloads_of(&bad);

        let imp = ImportReconciler::new(&f.session, &f.cfg, &f.store, &f.store);
        let report = imp.import_all().expect("import");
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.imported[0].name, "Good");
        let mut failed: Vec<_> = report.failed.iter().map(|(n, _)| n.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["Bad", "Empty"]);
    }

    #[test]
    fn listing_failure_is_reported_not_empty() {
        let f = fixture();
        f.remote.insert("Foo.aia", "application/zip", &[&f.folder], b"x");
        f.remote.fail_listing(true);
        let imp = ImportReconciler::new(&f.session, &f.cfg, &f.store, &f.store);
        assert!(imp.import_all().expect_err("unknown state").is_remote());
    }

    #[test]
    fn missing_folder_means_nothing_to_import() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = DirProjectStore::new(tmp.path());
        let remote = MemoryRemote::new();
        let session = Session::with_remote("alice", remote.clone());
        let cfg = BackupConfig::default();
        let imp = ImportReconciler::new(&session, &cfg, &store, &store);
        let report = imp.import_all().expect("import");
        assert!(report.imported.is_empty());
        assert_eq!(remote.calls().create, 0);
    }
}
