use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::import::{ImportReconciler, ImportReport};
use crate::scheduler::{BatchReport, Clock, DebounceScheduler, ProjectSaver, ScreenLock};
use crate::session::Session;
use crate::store::{ProjectArchiver, ProjectDescriptor, ProjectId, ProjectImporter, ProjectStore};
use crate::sync::SyncReconciler;

/// Everything the dispatcher thread does against the remote store.
pub trait BackupBackend: ProjectSaver + Send {
    fn import_all(&mut self) -> Result<ImportReport>;
    fn import_one(&mut self, remote_id: &str, name: &str) -> Option<ProjectDescriptor>;
    fn remote_projects(&mut self) -> Result<BTreeMap<String, String>>;
}

/// Backend over a user session and a local store that can list, archive and import projects.
pub struct SessionBackend<S> {
    session: Session,
    cfg: BackupConfig,
    store: S,
}

impl<S> SessionBackend<S>
where
    S: ProjectStore + ProjectArchiver + ProjectImporter,
{
    pub fn new(session: Session, cfg: BackupConfig, store: S) -> Self {
        Self {
            session,
            cfg,
            store,
        }
    }

    fn importer(&self) -> ImportReconciler<'_> {
        ImportReconciler::new(&self.session, &self.cfg, &self.store, &self.store)
    }
}

impl<S> ProjectSaver for SessionBackend<S>
where
    S: ProjectStore + ProjectArchiver + ProjectImporter,
{
    fn save_project(&mut self, id: ProjectId) -> Result<()> {
        SyncReconciler::new(&self.session, &self.cfg, &self.store, &self.store).save_project(id)
    }
}

impl<S> BackupBackend for SessionBackend<S>
where
    S: ProjectStore + ProjectArchiver + ProjectImporter,
{
    fn import_all(&mut self) -> Result<ImportReport> {
        self.importer().import_all()
    }

    fn import_one(&mut self, remote_id: &str, name: &str) -> Option<ProjectDescriptor> {
        self.importer().import_one(remote_id, name)
    }

    fn remote_projects(&mut self) -> Result<BTreeMap<String, String>> {
        self.importer().remote_projects()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub enabled: bool,
    pub forced_pending: BTreeSet<ProjectId>,
    pub flush_in: Option<Duration>,
}

pub enum BackupEvent {
    Dirty(Vec<ProjectId>),
    SyncNow {
        ids: Vec<ProjectId>,
        reply: Sender<BatchReport>,
    },
    ImportAll {
        reply: Sender<Result<ImportReport>>,
    },
    ImportOne {
        remote_id: String,
        name: String,
        reply: Sender<Option<ProjectDescriptor>>,
    },
    RemoteProjects {
        reply: Sender<Result<BTreeMap<String, String>>>,
    },
    Status {
        reply: Sender<ServiceStatus>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct BackupHandle {
    tx: Sender<BackupEvent>,
}

fn stopped<T>(_: T) -> Error {
    Error::Service("has stopped")
}

impl BackupHandle {
    pub fn notify_dirty(&self, ids: impl IntoIterator<Item = ProjectId>) -> Result<()> {
        self.tx
            .send(BackupEvent::Dirty(ids.into_iter().collect()))
            .map_err(stopped)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> BackupEvent) -> Result<T> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(make(reply)).map_err(stopped)?;
        rx.recv().map_err(stopped)
    }

    pub fn sync_now(&self, ids: impl IntoIterator<Item = ProjectId>) -> Result<BatchReport> {
        let ids = ids.into_iter().collect();
        self.request(|reply| BackupEvent::SyncNow { ids, reply })
    }

    pub fn import_all(&self) -> Result<ImportReport> {
        self.request(|reply| BackupEvent::ImportAll { reply })?
    }

    pub fn import_one(&self, remote_id: &str, name: &str) -> Result<Option<ProjectDescriptor>> {
        self.request(|reply| BackupEvent::ImportOne {
            remote_id: remote_id.to_string(),
            name: name.to_string(),
            reply,
        })
    }

    pub fn remote_projects(&self) -> Result<BTreeMap<String, String>> {
        self.request(|reply| BackupEvent::RemoteProjects { reply })?
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        self.request(|reply| BackupEvent::Status { reply })
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BackupEvent::Shutdown);
    }
}

/// Single flow of control for backups: one thread owns the scheduler and the backend and
/// handles host events in arrival order. Events sent while a batch runs wait in the channel.
pub struct BackupService<B> {
    enabled: bool,
    scheduler: DebounceScheduler,
    backend: B,
    tx: Sender<BackupEvent>,
    rx: Receiver<BackupEvent>,
}

impl<B: BackupBackend + 'static> BackupService<B> {
    pub fn new(
        cfg: &BackupConfig,
        backend: B,
        clock: Box<dyn Clock>,
        screens: Box<dyn ScreenLock>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            enabled: cfg.enabled,
            scheduler: DebounceScheduler::new(cfg, clock, screens),
            backend,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> BackupHandle {
        BackupHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn spawn(self) -> Result<(BackupHandle, JoinHandle<()>)> {
        let handle = self.handle();
        let join = std::thread::Builder::new()
            .name("drive-backup".into())
            .spawn(move || self.run())
            .map_err(|e| Error::io("failed to start backup thread", e))?;
        Ok((handle, join))
    }

    pub fn run(self) {
        let Self {
            enabled,
            mut scheduler,
            mut backend,
            tx,
            rx,
        } = self;
        // The loop ends once every handle is gone.
        drop(tx);
        info!(enabled, "backup service started");

        loop {
            if let Some(report) = scheduler.poll_timer(&mut backend) {
                log_batch("forced", &report);
            }
            let event = match scheduler.time_until_deadline() {
                Some(wait) => match rx.recv_timeout(wait) {
                    Ok(ev) => ev,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(ev) => ev,
                    Err(_) => break,
                },
            };

            match event {
                BackupEvent::Dirty(ids) => {
                    if !enabled {
                        debug!(count = ids.len(), "backup disabled; ignoring dirty projects");
                        continue;
                    }
                    let report = scheduler.notify_dirty(ids, &mut backend);
                    log_batch("autosave", &report);
                }
                BackupEvent::SyncNow { ids, reply } => {
                    let report = if enabled {
                        scheduler.save_now(ids, &mut backend)
                    } else {
                        debug!(count = ids.len(), "backup disabled; skipping sync");
                        BatchReport::default()
                    };
                    log_batch("manual", &report);
                    let _ = reply.send(report);
                }
                BackupEvent::ImportAll { reply } => {
                    let _ = reply.send(backend.import_all());
                }
                BackupEvent::ImportOne {
                    remote_id,
                    name,
                    reply,
                } => {
                    let _ = reply.send(backend.import_one(&remote_id, &name));
                }
                BackupEvent::RemoteProjects { reply } => {
                    let _ = reply.send(backend.remote_projects());
                }
                BackupEvent::Status { reply } => {
                    let _ = reply.send(ServiceStatus {
                        enabled,
                        forced_pending: scheduler.forced_pending(),
                        flush_in: scheduler.time_until_deadline(),
                    });
                }
                BackupEvent::Shutdown => break,
            }
        }

        let pending = scheduler.forced_pending();
        if !pending.is_empty() {
            warn!(count = pending.len(), "stopping with deferred projects not yet backed up");
        }
        info!("backup service stopped");
    }
}

fn log_batch(kind: &'static str, report: &BatchReport) {
    if report.is_empty() {
        return;
    }
    info!(
        kind,
        saved = report.saved.len(),
        failed = report.failed.len(),
        "backup batch finished"
    );
}
