//! Console user surface.
//!
//! Dialogs, notifications and error boxes are written through a blocking
//! writer thread. A stdin router answers the dialog at the front of the queue
//! and treats every other line as an application-menu command.

use crate::model::{HostEvent, MenuCommand};
use crate::surface::{Dialog, DialogKind, UserSurface};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

/// Output line routing for stdout/stderr writer.
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
pub fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

struct PendingPrompt {
    dialog: Dialog,
    reply: oneshot::Sender<usize>,
}

/// Result of routing one stdin line.
#[derive(Debug, PartialEq, Eq)]
pub enum Routed {
    Answered(usize),
    Invalid,
    Menu(MenuCommand),
    Unknown,
    Empty,
}

#[derive(Clone)]
pub struct ConsoleSurface {
    out: UnboundedSender<OutputLine>,
    prompts: Arc<Mutex<VecDeque<PendingPrompt>>>,
}

impl ConsoleSurface {
    pub fn new(out: UnboundedSender<OutputLine>) -> Self {
        Self {
            out,
            prompts: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn print(&self, line: impl Into<String>) {
        let _ = self.out.send(OutputLine::Stdout(line.into()));
    }

    fn eprint(&self, line: impl Into<String>) {
        let _ = self.out.send(OutputLine::Stderr(line.into()));
    }

    fn render(&self, dialog: &Dialog) {
        let marker = match dialog.kind {
            DialogKind::Info => "i",
            DialogKind::Question => "?",
        };
        self.print(format!("[{marker}] {}", dialog.title));
        self.print(format!("    {}", dialog.message));
        if let Some(detail) = dialog.detail.as_deref() {
            for line in detail.lines() {
                self.print(format!("    | {line}"));
            }
        }
        for (i, label) in dialog.buttons.iter().enumerate() {
            self.print(format!("    {}) {label}", i + 1));
        }
    }

    /// Route one line of user input: answer the front dialog or parse a menu command.
    pub fn route_line(&self, line: &str) -> Routed {
        let line = line.trim();
        if line.is_empty() {
            return Routed::Empty;
        }
        let Ok(mut prompts) = self.prompts.lock() else {
            return Routed::Unknown;
        };
        let Some(front) = prompts.front() else {
            drop(prompts);
            return match MenuCommand::parse(line) {
                Some(cmd) => Routed::Menu(cmd),
                None => Routed::Unknown,
            };
        };
        let Some(index) = parse_answer(line, &front.dialog.buttons) else {
            let buttons = front.dialog.buttons.len();
            drop(prompts);
            self.eprint(format!("Please answer with a number between 1 and {buttons}."));
            return Routed::Invalid;
        };
        if let Some(prompt) = prompts.pop_front() {
            let _ = prompt.reply.send(index);
        }
        let next = prompts.front().map(|p| p.dialog.clone());
        drop(prompts);
        if let Some(dialog) = next {
            self.render(&dialog);
        }
        Routed::Answered(index)
    }

    #[cfg(test)]
    pub fn pending_prompts(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl UserSurface for ConsoleSurface {
    fn confirm(&self, dialog: Dialog) -> BoxFuture<'static, usize> {
        let cancel = dialog.cancel_index;
        let (tx, rx) = oneshot::channel();
        let first = match self.prompts.lock() {
            Ok(mut prompts) => {
                prompts.push_back(PendingPrompt {
                    dialog: dialog.clone(),
                    reply: tx,
                });
                prompts.len() == 1
            }
            Err(_) => false,
        };
        // Queued dialogs are rendered once the ones before them are answered.
        if first {
            self.render(&dialog);
        }
        async move { rx.await.unwrap_or(cancel) }.boxed()
    }

    fn notify(&self, title: &str, body: &str) {
        tracing::info!(title, body, "notification");
        self.print(format!("[notice] {title}: {body}"));
    }

    fn show_error(&self, title: &str, message: &str) {
        self.eprint(format!("[error] {title}: {message}"));
    }
}

/// Accept a 1-based button number or a case-insensitive label prefix.
fn parse_answer(input: &str, buttons: &[String]) -> Option<usize> {
    if let Ok(n) = input.parse::<usize>() {
        return (1..=buttons.len()).contains(&n).then(|| n - 1);
    }
    let needle = input.to_ascii_lowercase();
    let mut matches = buttons
        .iter()
        .enumerate()
        .filter(|(_, label)| label.to_ascii_lowercase().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some((i, _)), None) => Some(i),
        _ => None,
    }
}

/// Read stdin on a dedicated thread and route every line.
///
/// EOF only stops the router; the application keeps running.
pub fn spawn_stdin_router(console: ConsoleSurface, events: UnboundedSender<HostEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match console.route_line(&line) {
                Routed::Menu(cmd) => {
                    if events.send(HostEvent::Menu(cmd)).is_err() {
                        break;
                    }
                }
                Routed::Unknown => {
                    console.eprint(format!("Unknown command {:?}, type `help`.", line.trim()));
                }
                Routed::Answered(_) | Routed::Invalid | Routed::Empty => {}
            }
        }
        tracing::debug!("stdin closed, menu input disabled");
    });
}
