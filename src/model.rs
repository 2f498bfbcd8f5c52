use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    pub app_name: String,
    pub current_version: String,
    pub feed_url: String,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub remind_after: Duration,
    #[serde(default, with = "humantime_serde")]
    pub check_interval: Option<Duration>,
    pub auto_check: bool,
    pub quit_on_all_closed: bool,
    pub window_title: String,
    pub user_agent: String,
}

impl ShellConfig {
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("instance.lock")
    }

    pub fn port_path(&self) -> PathBuf {
        self.data_dir.join("instance.port")
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join("update-prefs.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("main.log")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.cache_dir.join("pending")
    }
}

/// Remote version descriptor as published in the release feed (`latest.yml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub version: String,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    pub path: String,
    pub sha512: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl ReleaseInfo {
    /// Descriptor carrying only a version, for callers that never download.
    pub fn bare(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release_notes: None,
            release_date: None,
            path: String::new(),
            sha512: String::new(),
            size: None,
        }
    }
}

/// Events emitted by an update service while it checks, downloads or installs.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    CheckingForUpdate,
    UpdateAvailable(ReleaseInfo),
    UpdateNotAvailable,
    DownloadProgress { percent: f64 },
    UpdateDownloaded { version: String },
    Error { message: String },
}

/// What triggered an update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOrigin {
    Startup,
    Periodic,
    Menu,
    Ipc,
    Reminder,
}

impl CheckOrigin {
    /// Manual checks report "up to date"; automatic ones stay quiet.
    pub fn is_manual(self) -> bool {
        matches!(self, CheckOrigin::Menu | CheckOrigin::Ipc)
    }
}

/// Commands the coordinator sends to the host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// Show download progress in the window title; `None` restores the base title.
    Progress(Option<u8>),
    /// Leave the event loop. `relaunch` is informational: the installer relaunches.
    Exit { relaunch: bool },
}

/// Lifecycle and input events delivered to the host loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Ready,
    Activate,
    WindowClosed,
    SecondInstance,
    Menu(MenuCommand),
    QuitRequested,
}

/// Application menu entries available from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    CheckForUpdates,
    InstallUpdate,
    Version,
    Show,
    Close,
    Activate,
    Quit,
    Help,
}

impl MenuCommand {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "check" | "check-for-updates" | "c" => Some(MenuCommand::CheckForUpdates),
            "install" | "install-update" | "i" => Some(MenuCommand::InstallUpdate),
            "version" | "v" => Some(MenuCommand::Version),
            "show" | "focus" => Some(MenuCommand::Show),
            "close" => Some(MenuCommand::Close),
            "activate" | "open" => Some(MenuCommand::Activate),
            "quit" | "exit" | "q" => Some(MenuCommand::Quit),
            "help" | "?" | "h" => Some(MenuCommand::Help),
            _ => None,
        }
    }

    pub fn help_lines() -> &'static [&'static str] {
        &[
            "check    check for updates now",
            "install  install a downloaded update and restart",
            "version  print the application version",
            "show     show and focus the main window",
            "close    close the main window",
            "activate reopen the main window if it was closed",
            "quit     quit the application",
        ]
    }
}
