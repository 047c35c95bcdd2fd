use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::Result;
use crate::namespace::{RemoteNamespace, with_suffix};
use crate::remote::NewObject;
use crate::scheduler::ProjectSaver;
use crate::session::Session;
use crate::store::{ProjectArchiver, ProjectId, ProjectStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created { remote_id: String },
    Updated { remote_id: String },
}

impl SyncOutcome {
    pub fn remote_id(&self) -> &str {
        match self {
            Self::Created { remote_id } | Self::Updated { remote_id } => remote_id,
        }
    }
}

/// Pushes one local project to the backup folder, creating the archive object or overwriting
/// the existing one with the same name.
///
/// The create/update decision comes from a listing taken during the call. Another device writing
/// the same name between that listing and the write can still produce a duplicate; the next sync
/// then updates the first match and leaves the extra object alone.
pub struct SyncReconciler<'a> {
    session: &'a Session,
    cfg: &'a BackupConfig,
    store: &'a dyn ProjectStore,
    archiver: &'a dyn ProjectArchiver,
}

impl<'a> SyncReconciler<'a> {
    pub fn new(
        session: &'a Session,
        cfg: &'a BackupConfig,
        store: &'a dyn ProjectStore,
        archiver: &'a dyn ProjectArchiver,
    ) -> Self {
        Self {
            session,
            cfg,
            store,
            archiver,
        }
    }

    pub fn sync_project(&self, id: ProjectId) -> Result<SyncOutcome> {
        let user = self.session.user();
        let name = self.store.project_name(user, id)?;
        // Archive first: if the contents cannot be produced nothing remote is touched.
        let contents = self.archiver.export_source(user, id)?;

        let ns = RemoteNamespace::new(self.session.remote(), self.cfg);
        let folder_id = ns.resolve_folder()?;
        let object_name = with_suffix(&name, ns.suffix());
        let existing = ns.find_object_by_name(&folder_id, &object_name)?;

        let remote = self.session.remote();
        let outcome = match existing {
            Some(remote_id) => {
                remote.update(&remote_id, &object_name, &self.cfg.archive_mime_type, &contents)?;
                SyncOutcome::Updated { remote_id }
            }
            None => {
                let created = remote.create(
                    &NewObject {
                        name: object_name.clone(),
                        mime_type: self.cfg.archive_mime_type.clone(),
                        parents: vec![folder_id.clone()],
                    },
                    Some(&contents),
                )?;
                SyncOutcome::Created {
                    remote_id: created.id,
                }
            }
        };
        debug!(%id, name = %object_name, bytes = contents.len(), "project archive written");
        Ok(outcome)
    }
}

impl ProjectSaver for SyncReconciler<'_> {
    fn save_project(&mut self, id: ProjectId) -> Result<()> {
        match self.sync_project(id) {
            Ok(outcome) => {
                info!(%id, remote_id = outcome.remote_id(), ?outcome, "project backed up");
                Ok(())
            }
            Err(e) => {
                warn!(%id, error = %e, "project backup failed");
                Err(e)
            }
        }
    }
}
