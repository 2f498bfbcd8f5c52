//! Test doubles shared by unit tests.

use crate::error::UpdateError;
use crate::model::ShellConfig;
use crate::service::UpdateService;
use crate::surface::{Dialog, UserSurface};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

pub fn config(dir: &Path) -> ShellConfig {
    ShellConfig {
        app_name: "tracking-shell".into(),
        current_version: "1.0.0".into(),
        feed_url: "http://127.0.0.1:9/updates".into(),
        data_dir: dir.join("data"),
        cache_dir: dir.join("cache"),
        startup_delay: Duration::from_secs(3),
        remind_after: Duration::from_secs(3600),
        check_interval: None,
        auto_check: true,
        quit_on_all_closed: true,
        window_title: "Tracking".into(),
        user_agent: "tracking-shell/test".into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Check,
    Download,
    QuitAndInstall { silent: bool, force_run_after: bool },
}

/// Records calls; events are injected by the test on its own channel.
pub struct FakeService {
    calls: UnboundedSender<ServiceCall>,
    install_error: Mutex<Option<String>>,
}

impl FakeService {
    pub fn new() -> (Self, UnboundedReceiver<ServiceCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (
            Self {
                calls,
                install_error: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn fail_install(&self, message: &str) {
        *self.install_error.lock().unwrap() = Some(message.to_string());
    }
}

impl UpdateService for FakeService {
    fn check_for_updates(&self) {
        let _ = self.calls.send(ServiceCall::Check);
    }

    fn download_update(&self) {
        let _ = self.calls.send(ServiceCall::Download);
    }

    fn quit_and_install(&self, silent: bool, force_run_after: bool) -> Result<(), UpdateError> {
        let _ = self.calls.send(ServiceCall::QuitAndInstall {
            silent,
            force_run_after,
        });
        match self.install_error.lock().unwrap().clone() {
            Some(message) => Err(UpdateError::Feed(message)),
            None => Ok(()),
        }
    }
}

/// Hands every dialog to the test, which answers through the oneshot.
pub struct ScriptedSurface {
    dialogs: UnboundedSender<(Dialog, oneshot::Sender<usize>)>,
    notifications: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl ScriptedSurface {
    pub fn new() -> (Self, UnboundedReceiver<(Dialog, oneshot::Sender<usize>)>) {
        let (dialogs, rx) = mpsc::unbounded_channel();
        (
            Self {
                dialogs,
                notifications: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl UserSurface for ScriptedSurface {
    fn confirm(&self, dialog: Dialog) -> BoxFuture<'static, usize> {
        let cancel = dialog.cancel_index;
        let (tx, rx) = oneshot::channel();
        let _ = self.dialogs.send((dialog, tx));
        async move { rx.await.unwrap_or(cancel) }.boxed()
    }

    fn notify(&self, title: &str, body: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push(format!("{title}: {body}"));
    }

    fn show_error(&self, title: &str, message: &str) {
        self.errors.lock().unwrap().push(format!("{title}: {message}"));
    }
}

/// Minimal HTTP/1.1 file server on loopback; returns its base URL.
pub async fn serve_static(routes: Vec<(&'static str, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&head);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = match routes.iter().find(|(p, _)| *p == path) {
                    Some((_, body)) => ("200 OK", body.clone()),
                    None => ("404 Not Found", Vec::new()),
                };
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}
