//! Update coordinator actor.
//!
//! Owns the `UpdateSession` and serializes every input through it: service
//! events, dialog answers, timer expiries and requests from the menu, IPC and
//! host. Dialogs and timers run as separate tasks that post their outcome back
//! as inputs, so the loop never blocks on the user.

use super::machine::{
    AvailableChoice, DownloadedChoice, Effect, Input, UpdateSession, UpdateStatus,
};
use crate::model::{CheckOrigin, HostCommand, ReleaseInfo, ServiceEvent};
use crate::service::UpdateService;
use crate::storage::PrefsStore;
use crate::surface::{Dialog, DialogKind, UserSurface};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

pub(crate) enum CoordinatorMsg {
    Input(Input),
    Status(oneshot::Sender<UpdateStatus>),
}

/// Cheap, cloneable entry point used by the menu, IPC server, timers and host.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: UnboundedSender<CoordinatorMsg>,
}

impl CoordinatorHandle {
    /// Request a check; coalesced with any cycle already in flight.
    pub fn check_for_updates(&self, origin: CheckOrigin) -> bool {
        self.send(Input::Check(origin))
    }

    /// Install a downloaded update. No-op when nothing has been downloaded.
    pub fn install_update(&self) -> bool {
        self.send(Input::InstallRequested)
    }

    /// Ask the coordinator to quit, installing first if the user chose so.
    pub fn quit(&self) -> bool {
        self.send(Input::QuitRequested)
    }

    pub async fn status(&self) -> Option<UpdateStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(CoordinatorMsg::Status(tx)).ok()?;
        rx.await.ok()
    }

    /// Check once after `delay`.
    pub fn check_after(&self, delay: Duration, origin: CheckOrigin) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.check_for_updates(origin);
        });
    }

    /// Check every `interval` until the coordinator stops.
    pub fn check_periodically(&self, interval: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !handle.check_for_updates(CheckOrigin::Periodic) {
                    break;
                }
            }
        });
    }

    fn send(&self, input: Input) -> bool {
        self.tx.send(CoordinatorMsg::Input(input)).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, UnboundedReceiver<CoordinatorMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Everything the coordinator task needs.
pub struct CoordinatorParts<S, U> {
    pub session: UpdateSession,
    pub service: Arc<S>,
    pub surface: Arc<U>,
    pub service_events: UnboundedReceiver<ServiceEvent>,
    pub prefs: PrefsStore,
    pub host_tx: UnboundedSender<HostCommand>,
}

/// Spawn the coordinator task. It ends after it told the host to exit.
pub fn spawn_coordinator<S, U>(
    parts: CoordinatorParts<S, U>,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>)
where
    S: UpdateService,
    U: UserSurface,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let CoordinatorParts {
        session,
        service,
        surface,
        service_events,
        prefs,
        host_tx,
    } = parts;
    let controller = Controller {
        session,
        service,
        surface,
        prefs,
        host_tx,
        self_tx: tx.clone(),
        quitting: false,
    };
    let handle = tokio::spawn(controller.run(rx, service_events));
    (CoordinatorHandle { tx }, handle)
}

struct Controller<S, U> {
    session: UpdateSession,
    service: Arc<S>,
    surface: Arc<U>,
    prefs: PrefsStore,
    host_tx: UnboundedSender<HostCommand>,
    self_tx: UnboundedSender<CoordinatorMsg>,
    quitting: bool,
}

/// Outcome of executing one effect.
#[derive(Default)]
struct Step {
    follow_up: Option<Input>,
    exit: bool,
}

impl<S, U> Controller<S, U>
where
    S: UpdateService,
    U: UserSurface,
{
    async fn run(
        mut self,
        mut rx: UnboundedReceiver<CoordinatorMsg>,
        mut service_rx: UnboundedReceiver<ServiceEvent>,
    ) {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let keep_running = match msg {
                        CoordinatorMsg::Input(input) => self.dispatch(input),
                        CoordinatorMsg::Status(reply) => {
                            let _ = reply.send(self.session.status());
                            true
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some(event) = service_rx.recv() => {
                    if !self.dispatch(Input::Service(event)) {
                        break;
                    }
                }
                else => break,
            }
        }
        tracing::debug!("update coordinator stopped");
    }

    /// Feed one input through the state machine. Returns false once the host was told to exit.
    fn dispatch(&mut self, input: Input) -> bool {
        if matches!(input, Input::QuitRequested) {
            self.quitting = true;
        }
        let mut queue = VecDeque::from([input]);
        let mut keep_running = true;
        while let Some(input) = queue.pop_front() {
            for effect in self.session.apply(input) {
                let step = self.execute(effect);
                if let Some(next) = step.follow_up {
                    queue.push_back(next);
                }
                if step.exit {
                    keep_running = false;
                }
            }
        }
        keep_running
    }

    fn execute(&mut self, effect: Effect) -> Step {
        match effect {
            Effect::StartCheck => self.service.check_for_updates(),
            Effect::StartDownload => self.service.download_update(),
            Effect::PromptAvailable(info) => {
                let dialog = available_dialog(&info, self.session.current_version());
                let version = info.version;
                self.prompt(dialog, move |index| Input::AvailableAnswered {
                    version,
                    choice: AvailableChoice::from_index(index),
                });
            }
            Effect::PromptDownloaded { version } => {
                let dialog = downloaded_dialog(&version);
                self.prompt(dialog, move |index| Input::DownloadedAnswered {
                    version,
                    choice: DownloadedChoice::from_index(index),
                });
            }
            Effect::ScheduleReminder(after) => {
                tracing::info!(after = %humantime::format_duration(after), "reminding about the update later");
                let tx = self.self_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(CoordinatorMsg::Input(Input::ReminderElapsed));
                });
            }
            Effect::Progress(pct) => {
                let _ = self.host_tx.send(HostCommand::Progress(pct));
            }
            Effect::Notify { title, body } => self.surface.notify(&title, &body),
            Effect::ShowError { title, message } => self.surface.show_error(&title, &message),
            Effect::SkipChanged { version, skipped } => {
                if let Err(e) = self.prefs.set_skipped(&version, skipped) {
                    tracing::warn!(%version, error = %format!("{e:#}"), "failed to persist skipped version");
                }
            }
            Effect::QuitAndInstall {
                silent,
                force_run_after,
            } => {
                return match self.service.quit_and_install(silent, force_run_after) {
                    Ok(()) => self.exit(force_run_after),
                    Err(e) => {
                        let follow_up = Some(Input::Service(ServiceEvent::Error {
                            message: e.to_string(),
                        }));
                        if self.quitting {
                            // The user asked to quit; a failed install must not keep the app alive.
                            Step {
                                follow_up,
                                ..self.exit(false)
                            }
                        } else {
                            Step {
                                follow_up,
                                exit: false,
                            }
                        }
                    }
                };
            }
            Effect::Quit => return self.exit(false),
        }
        Step::default()
    }

    fn prompt<F>(&self, dialog: Dialog, answer: F)
    where
        F: FnOnce(usize) -> Input + Send + 'static,
    {
        let surface = self.surface.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let index = surface.confirm(dialog).await;
            let _ = tx.send(CoordinatorMsg::Input(answer(index)));
        });
    }

    fn exit(&self, relaunch: bool) -> Step {
        let _ = self.host_tx.send(HostCommand::Exit { relaunch });
        Step {
            follow_up: None,
            exit: true,
        }
    }
}

fn available_dialog(info: &ReleaseInfo, current_version: &str) -> Dialog {
    Dialog {
        kind: DialogKind::Question,
        title: "Update available".into(),
        message: format!(
            "Version {} is available (you have {current_version}). Download it now?",
            info.version
        ),
        detail: info.release_notes.clone().filter(|n| !n.trim().is_empty()),
        buttons: AvailableChoice::LABELS.iter().map(|s| s.to_string()).collect(),
        cancel_index: AvailableChoice::CANCEL_INDEX,
    }
}

fn downloaded_dialog(version: &str) -> Dialog {
    Dialog {
        kind: DialogKind::Info,
        title: "Restart to update".into(),
        message: format!("Version {version} has been downloaded. Restart now to install it?"),
        detail: None,
        buttons: DownloadedChoice::LABELS.iter().map(|s| s.to_string()).collect(),
        cancel_index: DownloadedChoice::CANCEL_INDEX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SessionConfig;
    use crate::testing::{FakeService, ScriptedSurface, ServiceCall};
    use std::collections::BTreeSet;

    const REMIND_AFTER: Duration = Duration::from_secs(3600);

    struct Harness {
        handle: CoordinatorHandle,
        task: tokio::task::JoinHandle<()>,
        service: Arc<FakeService>,
        surface: Arc<ScriptedSurface>,
        events: UnboundedSender<ServiceEvent>,
        calls: UnboundedReceiver<ServiceCall>,
        dialogs: UnboundedReceiver<(Dialog, oneshot::Sender<usize>)>,
        host: UnboundedReceiver<HostCommand>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (service, calls) = FakeService::new();
        let (surface, dialogs) = ScriptedSurface::new();
        let service = Arc::new(service);
        let surface = Arc::new(surface);
        let (events, service_events) = mpsc::unbounded_channel();
        let (host_tx, host) = mpsc::unbounded_channel();
        let session = UpdateSession::new(
            SessionConfig {
                current_version: "1.0.0".into(),
                remind_after: REMIND_AFTER,
            },
            BTreeSet::new(),
        );
        let (handle, task) = spawn_coordinator(CoordinatorParts {
            session,
            service: service.clone(),
            surface: surface.clone(),
            service_events,
            prefs: PrefsStore::new(dir.path().join("prefs.json")),
            host_tx,
        });
        Harness {
            handle,
            task,
            service,
            surface,
            events,
            calls,
            dialogs,
            host,
            _dir: dir,
        }
    }

    fn available(version: &str) -> ServiceEvent {
        ServiceEvent::UpdateAvailable(ReleaseInfo::bare(version))
    }

    /// Poll until the coordinator has processed whatever leads to `pred`.
    async fn wait_until<F>(handle: &CoordinatorHandle, pred: F) -> UpdateStatus
    where
        F: Fn(&UpdateStatus) -> bool,
    {
        loop {
            let status = handle.status().await.unwrap();
            if pred(&status) {
                return status;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn happy_path_prompts_twice_and_restarts_once() {
        let mut h = harness();

        h.handle.check_for_updates(CheckOrigin::Menu);
        h.handle.check_for_updates(CheckOrigin::Ipc);
        assert_eq!(h.calls.recv().await, Some(ServiceCall::Check));

        h.events.send(available("2.0.0")).unwrap();
        h.events.send(available("2.0.0")).unwrap();
        let (dialog, reply) = h.dialogs.recv().await.unwrap();
        assert_eq!(dialog.title, "Update available");
        assert_eq!(dialog.buttons.len(), 3);

        // Duplicate callback while the dialog is open must not open a second one.
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.state, "available");
        assert!(h.dialogs.try_recv().is_err());

        reply.send(0).unwrap();
        assert_eq!(h.calls.recv().await, Some(ServiceCall::Download));
        assert_eq!(h.host.recv().await, Some(HostCommand::Progress(Some(0))));

        h.events
            .send(ServiceEvent::DownloadProgress { percent: 10.0 })
            .unwrap();
        h.events
            .send(ServiceEvent::DownloadProgress { percent: 55.0 })
            .unwrap();
        assert_eq!(h.host.recv().await, Some(HostCommand::Progress(Some(10))));
        assert_eq!(h.host.recv().await, Some(HostCommand::Progress(Some(55))));

        h.events
            .send(ServiceEvent::UpdateDownloaded {
                version: "2.0.0".into(),
            })
            .unwrap();
        assert_eq!(h.host.recv().await, Some(HostCommand::Progress(None)));
        let (dialog, reply) = h.dialogs.recv().await.unwrap();
        assert_eq!(dialog.title, "Restart to update");
        reply.send(0).unwrap();

        assert_eq!(
            h.calls.recv().await,
            Some(ServiceCall::QuitAndInstall {
                silent: false,
                force_run_after: true
            })
        );
        assert_eq!(
            h.host.recv().await,
            Some(HostCommand::Exit { relaunch: true })
        );
        h.task.await.unwrap();
        assert!(h.dialogs.try_recv().is_err());
        assert_eq!(h.surface.notifications().len(), 1);
    }

    #[tokio::test]
    async fn error_is_surfaced_once_and_session_recovers() {
        let mut h = harness();
        h.handle.check_for_updates(CheckOrigin::Startup);
        assert_eq!(h.calls.recv().await, Some(ServiceCall::Check));

        h.events
            .send(ServiceEvent::Error {
                message: "getaddrinfo ENOTFOUND".into(),
            })
            .unwrap();
        wait_until(&h.handle, |s| s.state == "idle").await;
        assert_eq!(
            h.surface.errors(),
            vec!["Error while checking for updates: getaddrinfo ENOTFOUND".to_string()]
        );

        // A new check is possible afterwards.
        h.handle.check_for_updates(CheckOrigin::Menu);
        assert_eq!(h.calls.recv().await, Some(ServiceCall::Check));
    }

    #[tokio::test(start_paused = true)]
    async fn remind_later_rechecks_after_backoff() {
        let mut h = harness();
        h.handle.check_for_updates(CheckOrigin::Startup);
        assert_eq!(h.calls.recv().await, Some(ServiceCall::Check));
        h.events.send(available("2.0.0")).unwrap();

        let (_, reply) = h.dialogs.recv().await.unwrap();
        let answered_at = tokio::time::Instant::now();
        reply.send(1).unwrap();

        assert_eq!(h.calls.recv().await, Some(ServiceCall::Check));
        assert!(answered_at.elapsed() >= REMIND_AFTER);

        // Same version is offered again once the reminder fires.
        h.events.send(available("2.0.0")).unwrap();
        let (dialog, _reply) = h.dialogs.recv().await.unwrap();
        assert!(dialog.message.contains("2.0.0"));
    }

    #[tokio::test]
    async fn skip_is_persisted() {
        let mut h = harness();
        h.handle.check_for_updates(CheckOrigin::Startup);
        h.calls.recv().await;
        h.events.send(available("2.0.0")).unwrap();
        let (_, reply) = h.dialogs.recv().await.unwrap();
        reply.send(2).unwrap();

        wait_until(&h.handle, |s| s.state == "idle").await;
        let prefs = PrefsStore::new(h._dir.path().join("prefs.json")).load();
        assert!(prefs.skipped_versions.contains("2.0.0"));
    }

    #[tokio::test]
    async fn quit_installs_when_chosen_and_exits_even_if_install_fails() {
        let mut h = harness();
        h.service.fail_install("installer is locked");
        h.handle.check_for_updates(CheckOrigin::Startup);
        h.calls.recv().await;
        h.events.send(available("2.0.0")).unwrap();
        let (_, reply) = h.dialogs.recv().await.unwrap();
        reply.send(0).unwrap();
        assert_eq!(h.calls.recv().await, Some(ServiceCall::Download));
        h.events
            .send(ServiceEvent::UpdateDownloaded {
                version: "2.0.0".into(),
            })
            .unwrap();
        let (_, reply) = h.dialogs.recv().await.unwrap();
        reply.send(1).unwrap();
        wait_until(&h.handle, |s| s.install_on_quit).await;

        h.handle.quit();
        assert_eq!(
            h.calls.recv().await,
            Some(ServiceCall::QuitAndInstall {
                silent: true,
                force_run_after: false
            })
        );
        h.task.await.unwrap();
        let mut commands = Vec::new();
        while let Ok(cmd) = h.host.try_recv() {
            commands.push(cmd);
        }
        assert_eq!(commands.last(), Some(&HostCommand::Exit { relaunch: false }));
        assert_eq!(h.surface.errors().len(), 1);
    }

    #[tokio::test]
    async fn install_request_without_download_is_ignored() {
        let mut h = harness();
        h.handle.install_update();
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.state, "idle");
        assert!(h.calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn plain_quit_exits() {
        let mut h = harness();
        h.handle.quit();
        assert_eq!(
            h.host.recv().await,
            Some(HostCommand::Exit { relaunch: false })
        );
        h.task.await.unwrap();
        assert!(!h.handle.check_for_updates(CheckOrigin::Menu));
    }
}
