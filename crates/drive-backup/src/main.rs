use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use drive_backup::config::{BackupConfig, ConfigDoc, DriveConfig};
use drive_backup::credentials::StaticCredentials;
use drive_backup::import::ImportReconciler;
use drive_backup::scheduler::{LogScreenLock, SystemClock};
use drive_backup::service::{BackupService, SessionBackend};
use drive_backup::session::Session;
use drive_backup::store::{DirProjectStore, ProjectId};
use drive_backup::sync::SyncReconciler;
use drive_backup::watch::ChangeWatcher;
use drive_backup::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to a drive-backup TOML config (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level regardless of RUST_LOG
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the fully-resolved config (after imports/extends)
    Resolve,
    /// List project archives in the remote backup folder
    List,
    /// Back up the given local projects now
    Sync {
        /// Local project ids
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Import every remote archive whose name is not already a local project
    ImportAll,
    /// Import a single remote archive
    Import {
        #[arg(long)]
        remote_id: String,
        /// Remote archive name (the suffix is optional)
        #[arg(long)]
        name: String,
    },
    /// Watch the local store and back up edited projects with debouncing
    Watch {
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

struct App {
    doc: ConfigDoc,
    backup: BackupConfig,
    drive: DriveConfig,
    store: DirProjectStore,
}

impl App {
    fn load(path: Option<&Path>) -> Result<Self> {
        let doc = match path {
            Some(p) => drive_backup::config::load(p)?,
            None => ConfigDoc::parse("drive-backup.toml", "")?,
        };
        let backup = doc.backup()?;
        let drive = doc.drive()?;
        let store = DirProjectStore::new(doc.store()?.root_dir);
        Ok(Self {
            doc,
            backup,
            drive,
            store,
        })
    }

    fn session(&self) -> Result<Session> {
        let user = &self.backup.user_id;
        let creds = StaticCredentials::from_config(user, &self.drive);
        Session::drive(user, &creds, &self.drive)
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose, args.log_json);

    let app = App::load(args.config.as_deref())?;
    match args.cmd {
        Command::Resolve => cmd_resolve(&app),
        Command::List => cmd_list(&app),
        Command::Sync { ids } => cmd_sync(&app, ids.into_iter().map(ProjectId).collect()),
        Command::ImportAll => cmd_import_all(&app),
        Command::Import { remote_id, name } => cmd_import(&app, &remote_id, &name),
        Command::Watch { interval_secs } => cmd_watch(app, Duration::from_secs(interval_secs.max(1))),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn cmd_resolve(app: &App) -> Result<()> {
    let s = toml::to_string_pretty(&app.doc.value).unwrap_or_else(|_| format!("{:?}", app.doc.value));
    print!("{s}");
    Ok(())
}

fn cmd_list(app: &App) -> Result<()> {
    let session = app.session()?;
    let importer = ImportReconciler::new(&session, &app.backup, &app.store, &app.store);
    for (name, id) in importer.remote_projects()? {
        println!("{name}\t{id}");
    }
    Ok(())
}

fn cmd_sync(app: &App, ids: Vec<ProjectId>) -> Result<()> {
    if !app.backup.enabled {
        warn!("backup.enabled is false; nothing synced");
        return Ok(());
    }
    let session = app.session()?;
    let sync = SyncReconciler::new(&session, &app.backup, &app.store, &app.store);
    let mut first_err = None;
    for id in ids {
        match sync.sync_project(id) {
            Ok(outcome) => println!("{id}\t{outcome:?}"),
            Err(e) => {
                eprintln!("{id}\terror: {e}");
                first_err.get_or_insert(e);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn cmd_import_all(app: &App) -> Result<()> {
    let session = app.session()?;
    let importer = ImportReconciler::new(&session, &app.backup, &app.store, &app.store);
    let report = importer.import_all()?;
    for p in &report.imported {
        println!("imported\t{}\t{}", p.id, p.name);
    }
    for name in &report.skipped {
        println!("skipped\t{name}");
    }
    for (name, e) in &report.failed {
        println!("failed\t{name}\t{e}");
    }
    Ok(())
}

fn cmd_import(app: &App, remote_id: &str, name: &str) -> Result<()> {
    let session = app.session()?;
    let importer = ImportReconciler::new(&session, &app.backup, &app.store, &app.store);
    match importer.try_import_one(remote_id, name)? {
        Some(p) => println!("imported\t{}\t{}", p.id, p.name),
        None => println!("skipped\t{name}"),
    }
    Ok(())
}

fn cmd_watch(app: App, interval: Duration) -> Result<()> {
    let session = app.session()?;
    let user = app.backup.user_id.clone();
    let backend = SessionBackend::new(session, app.backup.clone(), app.store.clone());
    let service = BackupService::new(
        &app.backup,
        backend,
        Box::new(SystemClock),
        Box::new(LogScreenLock),
    );
    let (handle, join) = service.spawn()?;

    let mut watcher = ChangeWatcher::new();
    info!(user = %user, every_secs = interval.as_secs(), "watching local projects");
    loop {
        match watcher.poll(&app.store, &user) {
            Ok(dirty) if !dirty.is_empty() => {
                if handle.notify_dirty(dirty).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "polling local projects failed"),
        }
        std::thread::sleep(interval);
    }

    handle.shutdown();
    join.join()
        .map_err(|_| Error::Service("thread panicked"))
}
