//! Update lifecycle state machine.
//!
//! `UpdateSession::apply` is the single transition function: it takes one
//! input, mutates the session and returns the side effects the controller has
//! to perform. It never performs I/O itself, so every transition is testable
//! without a real update service or dialog surface.

use crate::model::{CheckOrigin, ReleaseInfo, ServiceEvent};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    /// The "update available" prompt for `version` is waiting for an answer.
    Available { version: String },
    Downloading { version: String },
    /// Download finished; the install prompt has not been answered yet.
    Downloaded { version: String },
    /// Download finished and the user postponed the install.
    Deferred { version: String },
    Restarting { version: String },
}

impl UpdateState {
    pub fn label(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available { .. } => "available",
            UpdateState::Downloading { .. } => "downloading",
            UpdateState::Downloaded { .. } => "downloaded",
            UpdateState::Deferred { .. } => "deferred",
            UpdateState::Restarting { .. } => "restarting",
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            UpdateState::Idle | UpdateState::Checking => None,
            UpdateState::Available { version }
            | UpdateState::Downloading { version }
            | UpdateState::Downloaded { version }
            | UpdateState::Deferred { version }
            | UpdateState::Restarting { version } => Some(version),
        }
    }
}

/// Answer to the "update available" prompt, in button order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailableChoice {
    Download,
    RemindLater,
    Skip,
}

impl AvailableChoice {
    pub const LABELS: [&'static str; 3] = ["Download now", "Remind me later", "Skip this version"];
    /// Button used when the dialog is dismissed.
    pub const CANCEL_INDEX: usize = 1;

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => AvailableChoice::Download,
            2 => AvailableChoice::Skip,
            _ => AvailableChoice::RemindLater,
        }
    }
}

/// Answer to the "update downloaded" prompt, in button order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadedChoice {
    RestartNow,
    OnNextQuit,
    Later,
}

impl DownloadedChoice {
    pub const LABELS: [&'static str; 3] = ["Restart now", "Restart on next quit", "Later"];
    pub const CANCEL_INDEX: usize = 2;

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => DownloadedChoice::RestartNow,
            1 => DownloadedChoice::OnNextQuit,
            _ => DownloadedChoice::Later,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Check(CheckOrigin),
    Service(ServiceEvent),
    AvailableAnswered {
        version: String,
        choice: AvailableChoice,
    },
    DownloadedAnswered {
        version: String,
        choice: DownloadedChoice,
    },
    ReminderElapsed,
    InstallRequested,
    QuitRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartCheck,
    StartDownload,
    PromptAvailable(ReleaseInfo),
    PromptDownloaded { version: String },
    ScheduleReminder(Duration),
    Progress(Option<u8>),
    Notify { title: String, body: String },
    ShowError { title: String, message: String },
    SkipChanged { version: String, skipped: bool },
    QuitAndInstall { silent: bool, force_run_after: bool },
    Quit,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub current_version: String,
    pub remind_after: Duration,
}

/// Point-in-time view of the session, served over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateStatus {
    pub state: &'static str,
    pub version: Option<String>,
    pub progress: Option<u8>,
    pub downloaded: Option<String>,
    pub install_on_quit: bool,
}

#[derive(Debug)]
pub struct UpdateSession {
    cfg: SessionConfig,
    state: UpdateState,
    latest: Option<ReleaseInfo>,
    downloaded: Option<String>,
    // One-shot per version; reset when a different descriptor shows up.
    prompted_available: bool,
    prompted_downloaded: bool,
    skipped: BTreeSet<String>,
    install_on_quit: bool,
    progress: Option<u8>,
    reminder_pending: bool,
    check_origin: Option<CheckOrigin>,
}

impl UpdateSession {
    pub fn new(cfg: SessionConfig, skipped: BTreeSet<String>) -> Self {
        Self {
            cfg,
            state: UpdateState::Idle,
            latest: None,
            downloaded: None,
            prompted_available: false,
            prompted_downloaded: false,
            skipped,
            install_on_quit: false,
            progress: None,
            reminder_pending: false,
            check_origin: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    #[cfg(test)]
    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    #[cfg(test)]
    pub fn install_on_quit(&self) -> bool {
        self.install_on_quit
    }

    #[cfg(test)]
    pub fn reminder_pending(&self) -> bool {
        self.reminder_pending
    }

    #[cfg(test)]
    pub fn is_skipped(&self, version: &str) -> bool {
        self.skipped.contains(version)
    }

    pub fn current_version(&self) -> &str {
        &self.cfg.current_version
    }

    pub fn status(&self) -> UpdateStatus {
        UpdateStatus {
            state: self.state.label(),
            version: self
                .state
                .version()
                .map(str::to_string)
                .or_else(|| self.latest.as_ref().map(|l| l.version.clone())),
            progress: self.progress,
            downloaded: self.downloaded.clone(),
            install_on_quit: self.install_on_quit,
        }
    }

    /// Apply one input and return the side effects to perform, in order.
    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Check(origin) => self.on_check(origin),
            Input::Service(event) => self.on_service(event),
            Input::AvailableAnswered { version, choice } => self.on_available_answer(version, choice),
            Input::DownloadedAnswered { version, choice } => {
                self.on_downloaded_answer(version, choice)
            }
            Input::ReminderElapsed => self.on_reminder(),
            Input::InstallRequested => self.on_install_requested(),
            Input::QuitRequested => self.on_quit(),
        }
    }

    fn on_check(&mut self, origin: CheckOrigin) -> Vec<Effect> {
        match self.state {
            UpdateState::Checking
            | UpdateState::Downloading { .. }
            | UpdateState::Available { .. }
            | UpdateState::Downloaded { .. }
            | UpdateState::Restarting { .. } => {
                tracing::debug!(?origin, state = self.state.label(), "update check coalesced");
                Vec::new()
            }
            UpdateState::Idle | UpdateState::Deferred { .. } => {
                tracing::info!(?origin, "checking for updates");
                self.state = UpdateState::Checking;
                self.check_origin = Some(origin);
                vec![Effect::StartCheck]
            }
        }
    }

    fn on_service(&mut self, event: ServiceEvent) -> Vec<Effect> {
        match event {
            ServiceEvent::CheckingForUpdate => {
                tracing::debug!("checking-for-update");
                Vec::new()
            }
            ServiceEvent::UpdateNotAvailable => self.on_not_available(),
            ServiceEvent::UpdateAvailable(info) => self.on_available(info),
            ServiceEvent::DownloadProgress { percent } => self.on_progress(percent),
            ServiceEvent::UpdateDownloaded { version } => self.on_downloaded(version),
            ServiceEvent::Error { message } => self.on_error(message),
        }
    }

    fn on_not_available(&mut self) -> Vec<Effect> {
        tracing::info!("update-not-available");
        if self.state != UpdateState::Checking {
            return Vec::new();
        }
        self.settle();
        match self.check_origin.take() {
            Some(origin) if origin.is_manual() => vec![Effect::Notify {
                title: "No updates available".into(),
                body: format!(
                    "You are running the latest version ({}).",
                    self.cfg.current_version
                ),
            }],
            _ => Vec::new(),
        }
    }

    fn on_available(&mut self, info: ReleaseInfo) -> Vec<Effect> {
        if matches!(self.state, UpdateState::Restarting { .. }) {
            return Vec::new();
        }
        let version = info.version.clone();
        tracing::info!(%version, "update-available");

        let superseded = self
            .latest
            .as_ref()
            .map(|l| l.version != version)
            .unwrap_or(true);
        if superseded {
            self.prompted_available = false;
            self.prompted_downloaded = false;
            if self.downloaded.as_deref() != Some(version.as_str()) {
                self.progress = None;
            }
        }
        self.latest = Some(info.clone());

        if matches!(&self.state, UpdateState::Downloading { version: v } if *v == version) {
            return Vec::new();
        }
        let origin = self.check_origin.take();
        let manual = origin.map(CheckOrigin::is_manual).unwrap_or(false);

        if self.downloaded.as_deref() == Some(version.as_str()) {
            self.settle();
            if manual {
                return vec![Effect::Notify {
                    title: "Update ready".into(),
                    body: format!("Version {version} is downloaded and ready to install."),
                }];
            }
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.skipped.contains(&version) {
            if !manual {
                tracing::info!(%version, "version skipped, not prompting");
                self.settle();
                return effects;
            }
            // An explicit check overrides an earlier skip.
            self.skipped.remove(&version);
            self.prompted_available = false;
            effects.push(Effect::SkipChanged {
                version: version.clone(),
                skipped: false,
            });
        }

        if self.prompted_available {
            if matches!(&self.state, UpdateState::Available { version: v } if *v == version) {
                return effects;
            }
            if !manual {
                self.settle();
                return effects;
            }
            // The earlier prompt was answered; an explicit check offers the version again.
            tracing::info!(%version, "re-offering update after manual check");
        }

        // Marked before the prompt is awaited so duplicate events cannot re-prompt.
        self.prompted_available = true;
        self.state = UpdateState::Available { version };
        effects.push(Effect::PromptAvailable(info));
        effects
    }

    fn on_available_answer(&mut self, version: String, choice: AvailableChoice) -> Vec<Effect> {
        if self.latest.as_ref().map(|l| l.version.as_str()) != Some(version.as_str()) {
            tracing::debug!(%version, "dropping answer for superseded version");
            return Vec::new();
        }
        let open = matches!(&self.state, UpdateState::Available { version: v } if *v == version);
        tracing::info!(%version, ?choice, "update-available answered");
        match choice {
            AvailableChoice::Download => {
                if !open {
                    return Vec::new();
                }
                self.state = UpdateState::Downloading { version };
                self.progress = Some(0);
                vec![Effect::StartDownload, Effect::Progress(Some(0))]
            }
            AvailableChoice::RemindLater => {
                if open {
                    self.settle();
                }
                if self.reminder_pending {
                    return Vec::new();
                }
                self.reminder_pending = true;
                vec![Effect::ScheduleReminder(self.cfg.remind_after)]
            }
            AvailableChoice::Skip => {
                if open {
                    self.settle();
                }
                if !self.skipped.insert(version.clone()) {
                    return Vec::new();
                }
                vec![Effect::SkipChanged {
                    version,
                    skipped: true,
                }]
            }
        }
    }

    fn on_reminder(&mut self) -> Vec<Effect> {
        if !self.reminder_pending {
            return Vec::new();
        }
        self.reminder_pending = false;
        if self.downloaded.is_some() {
            tracing::info!("reminder suppressed, an update is already downloaded");
            return Vec::new();
        }
        let effects = self.on_check(CheckOrigin::Reminder);
        if effects.is_empty() {
            // A cycle is already in flight and may have its own prompt open.
            tracing::debug!(state = self.state.label(), "reminder folded into running cycle");
            return effects;
        }
        if let Some(latest) = self.latest.as_ref() {
            if !self.skipped.contains(&latest.version) {
                self.prompted_available = false;
            }
        }
        effects
    }

    fn on_progress(&mut self, percent: f64) -> Vec<Effect> {
        if !matches!(self.state, UpdateState::Downloading { .. }) || !percent.is_finite() {
            return Vec::new();
        }
        let pct = percent.clamp(0.0, 100.0).floor() as u8;
        if self.progress.map(|p| pct <= p).unwrap_or(false) {
            return Vec::new();
        }
        self.progress = Some(pct);
        vec![Effect::Progress(Some(pct))]
    }

    fn on_downloaded(&mut self, version: String) -> Vec<Effect> {
        if matches!(self.state, UpdateState::Restarting { .. }) {
            return Vec::new();
        }
        tracing::info!(%version, "update-downloaded");
        if self.latest.as_ref().map(|l| l.version.as_str()) != Some(version.as_str()) {
            self.latest = Some(ReleaseInfo::bare(version.clone()));
            self.prompted_available = true;
            self.prompted_downloaded = false;
        }
        let was_downloading = matches!(self.state, UpdateState::Downloading { .. });
        self.downloaded = Some(version.clone());
        self.progress = None;

        let mut effects = Vec::new();
        if was_downloading {
            effects.push(Effect::Progress(None));
        }
        if self.prompted_downloaded {
            if was_downloading || self.state == UpdateState::Checking {
                self.settle();
            }
            return effects;
        }

        self.prompted_downloaded = true;
        self.state = UpdateState::Downloaded {
            version: version.clone(),
        };
        effects.push(Effect::Notify {
            title: "Update downloaded".into(),
            body: format!("Version {version} is ready to install."),
        });
        effects.push(Effect::PromptDownloaded { version });
        effects
    }

    fn on_downloaded_answer(&mut self, version: String, choice: DownloadedChoice) -> Vec<Effect> {
        if self.downloaded.as_deref() != Some(version.as_str())
            || matches!(self.state, UpdateState::Restarting { .. })
        {
            return Vec::new();
        }
        tracing::info!(%version, ?choice, "update-downloaded answered");
        let open = matches!(&self.state, UpdateState::Downloaded { version: v } if *v == version);
        match choice {
            DownloadedChoice::RestartNow => {
                self.state = UpdateState::Restarting { version };
                vec![Effect::QuitAndInstall {
                    silent: false,
                    force_run_after: true,
                }]
            }
            DownloadedChoice::OnNextQuit => {
                self.install_on_quit = true;
                if open {
                    self.settle();
                }
                Vec::new()
            }
            DownloadedChoice::Later => {
                if open {
                    self.settle();
                }
                Vec::new()
            }
        }
    }

    fn on_install_requested(&mut self) -> Vec<Effect> {
        let Some(version) = self.downloaded.clone() else {
            tracing::debug!("install requested with nothing downloaded");
            return Vec::new();
        };
        if matches!(self.state, UpdateState::Restarting { .. }) {
            return Vec::new();
        }
        self.state = UpdateState::Restarting { version };
        vec![Effect::QuitAndInstall {
            silent: false,
            force_run_after: true,
        }]
    }

    fn on_quit(&mut self) -> Vec<Effect> {
        if matches!(self.state, UpdateState::Restarting { .. }) {
            return vec![Effect::Quit];
        }
        match self.downloaded.clone() {
            Some(version) if self.install_on_quit => {
                tracing::info!(%version, "installing on quit");
                self.state = UpdateState::Restarting { version };
                vec![Effect::QuitAndInstall {
                    silent: true,
                    force_run_after: false,
                }]
            }
            _ => vec![Effect::Quit],
        }
    }

    fn on_error(&mut self, message: String) -> Vec<Effect> {
        let stage = match self.state {
            UpdateState::Checking => "checking for updates",
            UpdateState::Downloading { .. } => "downloading the update",
            UpdateState::Restarting { .. } => "installing the update",
            _ => "updating",
        };
        tracing::error!(stage, %message, "update error");

        let mut effects = Vec::new();
        if matches!(self.state, UpdateState::Downloading { .. }) {
            // Lets a later check offer the same version again.
            self.prompted_available = false;
            self.progress = None;
            effects.push(Effect::Progress(None));
        }
        self.check_origin = None;
        self.settle();
        effects.push(Effect::ShowError {
            title: format!("Error while {stage}"),
            message: if message.trim().is_empty() {
                "Unknown error".into()
            } else {
                message
            },
        });
        effects
    }

    /// Rest state: `Deferred` when an update is on disk, otherwise `Idle`.
    fn settle(&mut self) {
        self.state = match self.downloaded.clone() {
            Some(version) => UpdateState::Deferred { version },
            None => UpdateState::Idle,
        };
    }
}
