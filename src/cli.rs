use crate::console::{spawn_output_writer, spawn_stdin_router, ConsoleSurface};
use crate::coordinator::{spawn_coordinator, CoordinatorParts, SessionConfig, UpdateSession};
use crate::host::instance::{self, InstanceGuard, InstanceRole};
use crate::host::{run_shell, ShellParts};
use crate::ipc::{self, IpcContext};
use crate::model::{HostEvent, ShellConfig};
use crate::service::ReleaseFeedService;
use crate::storage::PrefsStore;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

const APP_NAME: &str = "tracking-shell";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "tracking-shell",
    version,
    about = "Desktop shell for the tracking admin tool with consent-driven auto-update"
)]
pub struct Cli {
    /// Base URL of the release feed (the directory holding latest.yml)
    #[arg(long)]
    pub feed_url: String,

    /// Directory for preferences, logs and the instance lock
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory where downloaded installers are staged
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Delay before the first automatic update check
    #[arg(long, default_value = "3s")]
    pub startup_delay: humantime::Duration,

    /// How long "Remind me later" waits before checking again
    #[arg(long, default_value = "1h")]
    pub remind_after: humantime::Duration,

    /// Check for updates periodically (e.g. 4h); off by default
    #[arg(long)]
    pub check_interval: Option<humantime::Duration>,

    /// Do not check for updates automatically (menu and IPC checks still work)
    #[arg(long)]
    pub no_auto_check: bool,

    /// Keep running after the main window is closed
    #[arg(long)]
    pub keep_running: bool,

    /// Main window title
    #[arg(long, default_value = "Tracking")]
    pub title: String,

    /// Stderr log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn build_config(args: &Cli) -> Result<ShellConfig> {
    let feed_url = args.feed_url.trim();
    if !(feed_url.starts_with("http://") || feed_url.starts_with("https://")) {
        anyhow::bail!("--feed-url must be an http(s) URL, got {feed_url:?}");
    }
    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .context("no platform data directory, pass --data-dir")?
            .join(APP_NAME),
    };
    let cache_dir = match &args.cache_dir {
        Some(dir) => dir.clone(),
        None => dirs::cache_dir()
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| data_dir.join("cache")),
    };
    let current_version = env!("CARGO_PKG_VERSION").to_string();

    Ok(ShellConfig {
        app_name: APP_NAME.into(),
        user_agent: format!("{APP_NAME}/{current_version}"),
        current_version,
        feed_url: feed_url.to_string(),
        data_dir,
        cache_dir,
        startup_delay: args.startup_delay.into(),
        remind_after: args.remind_after.into(),
        check_interval: args.check_interval.map(Into::into),
        auto_check: !args.no_auto_check,
        quit_on_all_closed: !args.keep_running,
        window_title: args.title.clone(),
    })
}

/// Take the single-instance lock, or hand off to the running instance and return `None`.
async fn claim_instance(cfg: &ShellConfig) -> Result<Option<InstanceGuard>> {
    match instance::acquire(&cfg.lock_path(), &cfg.port_path())? {
        InstanceRole::Primary(guard) => Ok(Some(guard)),
        InstanceRole::Secondary => {
            tracing::info!("another instance is running, handing off");
            instance::hand_off(&cfg.port_path())
                .await
                .context("another instance holds the lock but did not answer")?;
            Ok(None)
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("create {}", cfg.data_dir.display()))?;
    std::fs::create_dir_all(&cfg.cache_dir)
        .with_context(|| format!("create {}", cfg.cache_dir.display()))?;
    crate::logging::init(&cfg.log_path(), args.log_level.as_deref())?;
    tracing::info!(version = %cfg.current_version, feed = %cfg.feed_url, "starting");

    // A second launch stops here: no window, no coordinator, no shell.
    let Some(guard) = claim_instance(&cfg).await? else {
        return Ok(());
    };

    let prefs = PrefsStore::new(cfg.prefs_path());
    let skipped = prefs.load().skipped_versions;
    if !skipped.is_empty() {
        tracing::debug!(?skipped, "skipped versions");
    }

    let (service_tx, service_rx) = mpsc::unbounded_channel();
    let service = Arc::new(ReleaseFeedService::new(&cfg, service_tx)?);

    let (out_tx, _writer) = spawn_output_writer();
    let console = ConsoleSurface::new(out_tx);
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let session = UpdateSession::new(
        SessionConfig {
            current_version: cfg.current_version.clone(),
            remind_after: cfg.remind_after,
        },
        skipped,
    );
    let (coordinator, coordinator_task) = spawn_coordinator(CoordinatorParts {
        session,
        service,
        surface: Arc::new(console.clone()),
        service_events: service_rx,
        prefs,
        host_tx,
    });

    let (addr, ipc_task) = ipc::serve(IpcContext {
        app_version: cfg.current_version.clone(),
        coordinator: coordinator.clone(),
        host_events: event_tx.clone(),
    })
    .await?;
    guard.publish_port(addr.port())?;

    spawn_stdin_router(console.clone(), event_tx.clone());
    let _ = event_tx.send(HostEvent::Ready);

    let exit = run_shell(ShellParts {
        cfg,
        coordinator,
        console,
        events: event_rx,
        commands: host_rx,
    })
    .await;

    ipc_task.abort();
    coordinator_task.abort();
    drop(guard);
    tracing::info!(relaunch = exit.relaunch, "shutting down");
    Ok(())
}
