use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::store::ProjectId;

/// Pushes one project remotely. Implemented by the sync reconciler; tests substitute recorders.
pub trait ProjectSaver {
    fn save_project(&mut self, id: ProjectId) -> Result<()>;
}

/// Host switch that blocks screen transitions while a save batch talks to the remote store.
pub trait ScreenLock: Send {
    fn lock_screens(&mut self, locked: bool);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogScreenLock;

impl ScreenLock for LogScreenLock {
    fn lock_screens(&mut self, locked: bool) {
        debug!(locked, "screen lock");
    }
}

/// Holds the screen lock for the lifetime of a batch. Release runs on drop, so a panicking saver
/// still unlocks.
pub struct ScreenLockGuard<'a> {
    lock: &'a mut dyn ScreenLock,
}

impl<'a> ScreenLockGuard<'a> {
    pub fn acquire(lock: &'a mut dyn ScreenLock) -> Self {
        lock.lock_screens(true);
        Self { lock }
    }
}

impl Drop for ScreenLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.lock_screens(false);
    }
}

pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Fresh,
    /// Waiting in the forced-save set for the flush timer.
    Deferred,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectState {
    pub last_backup: Option<Instant>,
    pub phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceTimer {
    Idle,
    Armed { deadline: Instant },
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub saved: Vec<ProjectId>,
    pub failed: Vec<(ProjectId, Error)>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Classification {
    pub save_now: Vec<ProjectId>,
    pub deferred: Vec<ProjectId>,
}

/// Decides when dirty projects are pushed.
///
/// A project saved less than the autosave window ago is deferred into the forced-save set instead
/// of being saved again; a single timer flushes that set once the forced window has passed since
/// the set became non-empty. The timer is armed exactly while the set is non-empty.
pub struct DebounceScheduler {
    autosave_window: Duration,
    forced_window: Duration,
    clock: Box<dyn Clock>,
    screens: Box<dyn ScreenLock>,
    states: BTreeMap<ProjectId, ProjectState>,
    timer: ForceTimer,
}

impl DebounceScheduler {
    pub fn new(cfg: &BackupConfig, clock: Box<dyn Clock>, screens: Box<dyn ScreenLock>) -> Self {
        Self {
            autosave_window: cfg.autosave_window(),
            forced_window: cfg.forced_window(),
            clock,
            screens,
            states: BTreeMap::new(),
            timer: ForceTimer::Idle,
        }
    }

    pub fn phase(&self, id: ProjectId) -> Phase {
        self.states.get(&id).map(|s| s.phase).unwrap_or_default()
    }

    pub fn last_backup(&self, id: ProjectId) -> Option<Instant> {
        self.states.get(&id).and_then(|s| s.last_backup)
    }

    pub fn forced_pending(&self) -> BTreeSet<ProjectId> {
        self.states
            .iter()
            .filter(|(_, s)| s.phase == Phase::Deferred)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn timer(&self) -> ForceTimer {
        self.timer
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.timer {
            ForceTimer::Idle => None,
            ForceTimer::Armed { deadline } => Some(deadline),
        }
    }

    /// Partitions `ids` into save-now and deferred, updating phases and the timer. Makes no
    /// remote calls.
    pub fn classify(&mut self, ids: impl IntoIterator<Item = ProjectId>) -> Classification {
        let now = self.clock.now();
        let ids: BTreeSet<ProjectId> = ids.into_iter().collect();
        let mut out = Classification::default();

        for id in ids {
            let state = self.states.entry(id).or_default();
            let recent = state
                .last_backup
                .is_some_and(|t| now.saturating_duration_since(t) <= self.autosave_window);
            if recent {
                state.phase = Phase::Deferred;
                out.deferred.push(id);
            } else {
                state.phase = Phase::Fresh;
                out.save_now.push(id);
            }
        }

        self.sync_timer(now, out.deferred.len());
        out
    }

    // Keeps the timer armed exactly while something is deferred. An already armed timer keeps
    // its first deadline.
    fn sync_timer(&mut self, now: Instant, newly_deferred: usize) {
        let pending = self.states.values().any(|s| s.phase == Phase::Deferred);
        match (pending, self.timer) {
            (true, ForceTimer::Idle) => {
                let deadline = now + self.forced_window;
                self.timer = ForceTimer::Armed { deadline };
                debug!(
                    deferred = newly_deferred,
                    in_ms = self.forced_window.as_millis() as u64,
                    "forced flush armed"
                );
            }
            (false, ForceTimer::Armed { .. }) => {
                self.timer = ForceTimer::Idle;
                debug!("forced flush disarmed; nothing deferred");
            }
            _ => {}
        }
    }

    pub fn time_until_deadline(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(self.clock.now()))
    }

    pub fn notify_dirty(
        &mut self,
        ids: impl IntoIterator<Item = ProjectId>,
        saver: &mut dyn ProjectSaver,
    ) -> BatchReport {
        let classes = self.classify(ids);
        if !classes.deferred.is_empty() {
            debug!(ids = ?classes.deferred, "deferring recently saved projects");
        }
        self.submit(&classes.save_now, saver)
    }

    /// Saves `ids` regardless of how recently they were backed up, taking them out of the
    /// forced-save set.
    pub fn save_now(
        &mut self,
        ids: impl IntoIterator<Item = ProjectId>,
        saver: &mut dyn ProjectSaver,
    ) -> BatchReport {
        let ids: BTreeSet<ProjectId> = ids.into_iter().collect();
        for id in &ids {
            self.states.entry(*id).or_default().phase = Phase::Fresh;
        }
        let now = self.clock.now();
        self.sync_timer(now, 0);
        let ids: Vec<ProjectId> = ids.into_iter().collect();
        self.submit(&ids, saver)
    }

    /// Fires the forced flush if its deadline has passed.
    pub fn poll_timer(&mut self, saver: &mut dyn ProjectSaver) -> Option<BatchReport> {
        let deadline = self.deadline()?;
        if self.clock.now() < deadline {
            return None;
        }
        Some(self.fire_forced_flush(saver))
    }

    pub fn fire_forced_flush(&mut self, saver: &mut dyn ProjectSaver) -> BatchReport {
        self.timer = ForceTimer::Idle;
        let mut ids = Vec::new();
        for (id, state) in self.states.iter_mut() {
            if state.phase == Phase::Deferred {
                state.phase = Phase::Fresh;
                ids.push(*id);
            }
        }
        if ids.is_empty() {
            return BatchReport::default();
        }
        info!(count = ids.len(), "forced flush of deferred projects");
        self.submit(&ids, saver)
    }

    fn submit(&mut self, ids: &[ProjectId], saver: &mut dyn ProjectSaver) -> BatchReport {
        if ids.is_empty() {
            return BatchReport::default();
        }
        run_batch(
            self.screens.as_mut(),
            self.clock.as_ref(),
            &mut self.states,
            ids,
            saver,
        )
    }
}

fn run_batch(
    screens: &mut dyn ScreenLock,
    clock: &dyn Clock,
    states: &mut BTreeMap<ProjectId, ProjectState>,
    ids: &[ProjectId],
    saver: &mut dyn ProjectSaver,
) -> BatchReport {
    let _guard = ScreenLockGuard::acquire(screens);
    let mut report = BatchReport::default();
    for &id in ids {
        match saver.save_project(id) {
            Ok(()) => {
                let done = clock.now();
                let state = states.entry(id).or_default();
                state.last_backup = Some(state.last_backup.map_or(done, |t| t.max(done)));
                report.saved.push(id);
            }
            Err(e) => {
                warn!(%id, error = %e, "save failed; project stays dirty until next notification");
                report.failed.push((id, e));
            }
        }
    }
    report
}
