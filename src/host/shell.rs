//! Host event loop.
//!
//! Reacts to application lifecycle events, console menu commands and ctrl-c,
//! and applies the commands the update coordinator sends back. Quitting always
//! goes through the coordinator so a pending install-on-quit runs first.

use super::window::WindowHost;
use crate::console::ConsoleSurface;
use crate::coordinator::CoordinatorHandle;
use crate::model::{CheckOrigin, HostCommand, HostEvent, MenuCommand, ShellConfig};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// How long the coordinator gets to finish quitting before the shell leaves anyway.
const QUIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellExit {
    pub relaunch: bool,
}

pub struct ShellParts {
    pub cfg: ShellConfig,
    pub coordinator: CoordinatorHandle,
    pub console: ConsoleSurface,
    pub events: UnboundedReceiver<HostEvent>,
    pub commands: UnboundedReceiver<HostCommand>,
}

struct Shell {
    cfg: ShellConfig,
    coordinator: CoordinatorHandle,
    console: ConsoleSurface,
    windows: WindowHost,
    quit_deadline: Option<Instant>,
}

pub async fn run_shell(parts: ShellParts) -> ShellExit {
    let ShellParts {
        cfg,
        coordinator,
        console,
        mut events,
        mut commands,
    } = parts;
    let mut shell = Shell {
        windows: WindowHost::new(cfg.window_title.clone()),
        cfg,
        coordinator,
        console,
        quit_deadline: None,
    };

    loop {
        let deadline = shell.quit_deadline;
        tokio::select! {
            Some(event) = events.recv() => {
                if let Some(exit) = shell.handle_event(event).await {
                    return exit;
                }
            }
            Some(command) = commands.recv() => match command {
                HostCommand::Progress(pct) => {
                    if let Some(title) = shell.windows.set_progress(pct) {
                        tracing::debug!(%title, "window title");
                    }
                }
                HostCommand::Exit { relaunch } => {
                    tracing::info!(relaunch, "leaving event loop");
                    return ShellExit { relaunch };
                }
            },
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "ctrl-c handler failed");
                }
                if shell.quit_deadline.is_some() {
                    return ShellExit { relaunch: false };
                }
                if let Some(exit) = shell.request_quit() {
                    return exit;
                }
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => futures::future::pending().await,
                }
            } => {
                tracing::warn!("update coordinator did not finish quitting in time");
                return ShellExit { relaunch: false };
            }
            else => return ShellExit { relaunch: false },
        }
    }
}

impl Shell {
    async fn handle_event(&mut self, event: HostEvent) -> Option<ShellExit> {
        tracing::debug!(?event, "host event");
        match event {
            HostEvent::Ready => {
                let window = self.windows.create();
                tracing::info!(id = window.id, title = %window.title, "main window shown");
                self.console.print(format!(
                    "{} {} ready, type `help` for commands.",
                    self.cfg.window_title, self.cfg.current_version
                ));
                if self.cfg.auto_check {
                    self.coordinator
                        .check_after(self.cfg.startup_delay, CheckOrigin::Startup);
                    if let Some(every) = self.cfg.check_interval {
                        self.coordinator.check_periodically(every);
                    }
                }
            }
            HostEvent::Activate => {
                self.windows.activate();
            }
            HostEvent::WindowClosed => return self.close_window(),
            HostEvent::SecondInstance => {
                if !self.windows.focus_existing() {
                    self.windows.activate();
                }
            }
            HostEvent::QuitRequested => return self.request_quit(),
            HostEvent::Menu(command) => return self.menu(command).await,
        }
        None
    }

    async fn menu(&mut self, command: MenuCommand) -> Option<ShellExit> {
        match command {
            MenuCommand::CheckForUpdates => {
                self.coordinator.check_for_updates(CheckOrigin::Menu);
            }
            MenuCommand::InstallUpdate => {
                let downloaded = self
                    .coordinator
                    .status()
                    .await
                    .and_then(|s| s.downloaded)
                    .is_some();
                if downloaded {
                    self.coordinator.install_update();
                } else {
                    self.console.print("No update has been downloaded yet.");
                }
            }
            MenuCommand::Version => {
                self.console
                    .print(format!("{} {}", self.cfg.app_name, self.cfg.current_version));
            }
            MenuCommand::Show => {
                if !self.windows.focus_existing() {
                    self.windows.activate();
                }
            }
            MenuCommand::Close => return self.close_window(),
            MenuCommand::Activate => {
                self.windows.activate();
            }
            MenuCommand::Quit => return self.request_quit(),
            MenuCommand::Help => {
                for line in MenuCommand::help_lines() {
                    self.console.print(format!("  {line}"));
                }
            }
        }
        None
    }

    fn close_window(&mut self) -> Option<ShellExit> {
        // Closing an already closed window is not "all windows closed" again.
        if self.windows.close() && self.cfg.quit_on_all_closed {
            return self.request_quit();
        }
        None
    }

    fn request_quit(&mut self) -> Option<ShellExit> {
        if self.quit_deadline.is_some() {
            return None;
        }
        if !self.coordinator.quit() {
            return Some(ShellExit { relaunch: false });
        }
        self.quit_deadline = Some(Instant::now() + QUIT_GRACE);
        None
    }
}
