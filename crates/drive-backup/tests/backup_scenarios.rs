use std::time::Duration;

use drive_backup::config::BackupConfig;
use drive_backup::import::ImportReconciler;
use drive_backup::remote::MemoryRemote;
use drive_backup::scheduler::{Clock, DebounceScheduler, LogScreenLock, ManualClock, Phase};
use drive_backup::session::Session;
use drive_backup::store::{DirProjectStore, ProjectArchiver, ProjectId};
use drive_backup::sync::SyncReconciler;

struct Harness {
    _tmp: tempfile::TempDir,
    store: DirProjectStore,
    remote: MemoryRemote,
    session: Session,
    cfg: BackupConfig,
    clock: ManualClock,
    scheduler: DebounceScheduler,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = DirProjectStore::new(tmp.path());
    let remote = MemoryRemote::new();
    let session = Session::with_remote("alice", remote.clone());
    let cfg = BackupConfig::default();
    let clock = ManualClock::new();
    let scheduler = DebounceScheduler::new(&cfg, Box::new(clock.clone()), Box::new(LogScreenLock));
    Harness {
        _tmp: tmp,
        store,
        remote,
        session,
        cfg,
        clock,
        scheduler,
    }
}

impl Harness {
    fn project(&self, name: &str, source: &[u8]) -> ProjectId {
        self.store
            .create_project("alice", name, source)
            .expect("create project")
            .id
    }

    fn notify(&mut self, ids: &[ProjectId]) -> Vec<ProjectId> {
        let mut saver = SyncReconciler::new(&self.session, &self.cfg, &self.store, &self.store);
        self.scheduler
            .notify_dirty(ids.iter().copied(), &mut saver)
            .saved
    }

    fn flush(&mut self) -> Vec<ProjectId> {
        let mut saver = SyncReconciler::new(&self.session, &self.cfg, &self.store, &self.store);
        self.scheduler
            .poll_timer(&mut saver)
            .map(|r| r.saved)
            .unwrap_or_default()
    }
}

#[test]
fn first_notification_backs_up_every_project() {
    let mut h = harness();
    let a = h.project("Foo", b"foo");
    let b = h.project("Bar", b"bar");

    let saved = h.notify(&[a, b]);
    assert_eq!(saved, vec![a, b]);
    assert_eq!(h.remote.objects_named("Foo.aia").len(), 1);
    assert_eq!(h.remote.objects_named("Bar.aia").len(), 1);
    assert_eq!(h.scheduler.deadline(), None);
}

#[test]
fn edits_inside_the_window_are_flushed_once_by_the_timer() {
    let mut h = harness();
    let a = h.project("Foo", b"v1");
    h.notify(&[a]);
    let t0 = h.clock.now();

    h.clock.advance(Duration::from_millis(5_000));
    h.store.write_source("alice", a, b"v2").expect("edit");
    assert!(h.notify(&[a]).is_empty());
    assert_eq!(h.scheduler.phase(a), Phase::Deferred);
    assert_eq!(
        h.scheduler.deadline(),
        Some(t0 + Duration::from_millis(155_000))
    );

    // More edits before the deadline are absorbed into the pending flush.
    h.clock.advance(Duration::from_millis(60_000));
    h.store.write_source("alice", a, b"v3").expect("edit");
    assert!(h.notify(&[a]).is_empty());
    assert!(h.flush().is_empty());

    h.clock.advance(Duration::from_millis(90_000));
    assert_eq!(h.flush(), vec![a]);
    let objs = h.remote.objects_named("Foo.aia");
    assert_eq!(objs.len(), 1);
    assert_eq!(h.remote.media(&objs[0].id).expect("media"), b"v3");
    assert!(h.scheduler.forced_pending().is_empty());
}

#[test]
fn forced_flush_with_one_failure_records_only_the_success() {
    let mut h = harness();
    let a = h.project("Foo", b"foo");
    let b = h.project("Bar", b"bar");
    h.notify(&[a, b]);
    let first = h.scheduler.last_backup(a);

    h.notify(&[a, b]);
    assert_eq!(h.scheduler.forced_pending().len(), 2);

    h.remote.fail_writes_to("Foo.aia");
    h.clock.advance(Duration::from_millis(150_000));
    assert_eq!(h.flush(), vec![b]);
    assert!(h.scheduler.forced_pending().is_empty());
    assert_eq!(h.scheduler.last_backup(a), first);
    assert!(h.scheduler.last_backup(b) > first);
}

#[test]
fn import_restores_only_names_missing_locally() {
    let h = harness();
    let folder = h.remote.insert_folder(&h.cfg.folder_name);
    h.remote.insert("Foo.aia", "application/zip", &[&folder], b"remote-foo");
    h.remote.insert("Bar.aia", "application/zip", &[&folder], b"remote-bar");
    let foo = h.project("Foo", b"local-foo");

    let imp = ImportReconciler::new(&h.session, &h.cfg, &h.store, &h.store);
    let report = imp.import_all().expect("import");
    assert_eq!(report.imported.len(), 1);
    assert_eq!(report.imported[0].name, "Bar");
    assert_eq!(
        h.store.export_source("alice", report.imported[0].id).expect("export"),
        b"remote-bar"
    );
    assert_eq!(h.store.export_source("alice", foo).expect("export"), b"local-foo");
    assert!(imp.import_all().expect("again").imported.is_empty());
}
