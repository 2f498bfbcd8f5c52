//! HTTP release feed in the generic-provider layout: `<feed>/latest.yml`
//! describes the newest release and `path` points at the installer next to it.

use super::download;
use super::UpdateService;
use crate::error::UpdateError;
use crate::model::{ReleaseInfo, ServiceEvent, ShellConfig};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

const FEED_FILE: &str = "latest.yml";

pub struct ReleaseFeedService {
    http: reqwest::Client,
    feed_url: String,
    current: semver::Version,
    pending_dir: PathBuf,
    events: UnboundedSender<ServiceEvent>,
    latest: Arc<Mutex<Option<ReleaseInfo>>>,
    staged: Arc<Mutex<Option<PathBuf>>>,
}

impl ReleaseFeedService {
    pub fn new(cfg: &ShellConfig, events: UnboundedSender<ServiceEvent>) -> Result<Self, UpdateError> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            feed_url: cfg.feed_url.trim_end_matches('/').to_string(),
            current: parse_version(&cfg.current_version)?,
            pending_dir: cfg.pending_dir(),
            events,
            latest: Arc::new(Mutex::new(None)),
            staged: Arc::new(Mutex::new(None)),
        })
    }
}

impl UpdateService for ReleaseFeedService {
    fn check_for_updates(&self) {
        let http = self.http.clone();
        let url = format!("{}/{FEED_FILE}", self.feed_url);
        let current = self.current.clone();
        let latest = self.latest.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let _ = events.send(ServiceEvent::CheckingForUpdate);
            let event = match fetch_release(&http, &url).await {
                Ok(info) => match is_newer(&info.version, &current) {
                    Ok(true) => {
                        set(&latest, Some(info.clone()));
                        ServiceEvent::UpdateAvailable(info)
                    }
                    Ok(false) => ServiceEvent::UpdateNotAvailable,
                    Err(e) => ServiceEvent::Error {
                        message: e.to_string(),
                    },
                },
                Err(e) => {
                    tracing::warn!(%url, error = %e, "release feed check failed");
                    ServiceEvent::Error {
                        message: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    fn download_update(&self) {
        let Some(info) = get(&self.latest) else {
            let _ = self.events.send(ServiceEvent::Error {
                message: "no update is available to download".into(),
            });
            return;
        };
        let http = self.http.clone();
        let url = asset_url(&self.feed_url, &info.path);
        let dest = self.pending_dir.join(asset_file_name(&info.path));
        let staged = self.staged.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tracing::info!(version = %info.version, %url, dest = %dest.display(), "downloading update");
            let progress_tx = events.clone();
            let res = download::download_to_file(&http, &url, &dest, info.size, &info.sha512, |pct| {
                let _ = progress_tx.send(ServiceEvent::DownloadProgress {
                    percent: f64::from(pct),
                });
            })
            .await
            .and_then(|()| mark_executable(&dest));

            match res {
                Ok(()) => {
                    set(&staged, Some(dest));
                    let _ = events.send(ServiceEvent::UpdateDownloaded {
                        version: info.version,
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "update download failed");
                    let _ = events.send(ServiceEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        });
    }

    fn quit_and_install(&self, silent: bool, force_run_after: bool) -> Result<(), UpdateError> {
        let path = get(&self.staged).ok_or(UpdateError::NothingStaged)?;
        let args = installer_args(silent, force_run_after);
        tracing::info!(installer = %path.display(), ?args, "launching installer");
        std::process::Command::new(&path)
            .args(&args)
            .spawn()
            .map_err(|source| UpdateError::Launch {
                path: path.clone(),
                source,
            })?;
        Ok(())
    }
}

async fn fetch_release(http: &reqwest::Client, url: &str) -> Result<ReleaseInfo, UpdateError> {
    let body = http.get(url).send().await?.error_for_status()?.text().await?;
    let info: ReleaseInfo = serde_yaml::from_str(&body)?;
    if info.path.trim().is_empty() {
        return Err(UpdateError::Feed(format!("{url} has an empty path")));
    }
    Ok(info)
}

fn parse_version(raw: &str) -> Result<semver::Version, UpdateError> {
    let trimmed = raw.trim().trim_start_matches('v');
    semver::Version::parse(trimmed).map_err(|source| UpdateError::Version {
        version: raw.to_string(),
        source,
    })
}

/// True when `remote` is strictly newer than the running version.
pub(crate) fn is_newer(remote: &str, current: &semver::Version) -> Result<bool, UpdateError> {
    Ok(parse_version(remote)? > *current)
}

/// Resolve a feed-relative asset path; absolute URLs are used as-is.
pub(crate) fn asset_url(feed_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            feed_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Local file name for a downloaded asset. Never escapes the pending directory.
pub(crate) fn asset_file_name(path: &str) -> String {
    let name = path
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit(['/', '\\']).next())
        .unwrap_or("");
    if name.is_empty() || name == "." || name == ".." {
        "update-installer".to_string()
    } else {
        name.to_string()
    }
}

pub(crate) fn installer_args(silent: bool, force_run_after: bool) -> Vec<&'static str> {
    let mut args = Vec::new();
    if silent {
        args.push("--silent");
    }
    if force_run_after {
        args.push("--force-run");
    }
    args
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), UpdateError> {
    Ok(())
}

fn get<T: Clone>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().ok().and_then(|guard| guard.clone())
}

fn set<T>(slot: &Mutex<Option<T>>, value: Option<T>) {
    if let Ok(mut guard) = slot.lock() {
        *guard = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_versions_only() {
        let current = semver::Version::parse("1.4.2").unwrap();
        assert!(is_newer("1.5.0", &current).unwrap());
        assert!(is_newer("v2.0.0", &current).unwrap());
        assert!(!is_newer("1.4.2", &current).unwrap());
        assert!(!is_newer("1.4.1", &current).unwrap());
        assert!(!is_newer("1.5.0-beta.1", &semver::Version::parse("1.5.0").unwrap()).unwrap());
        assert!(is_newer("not-a-version", &current).is_err());
    }

    #[test]
    fn asset_urls_resolve_against_feed() {
        assert_eq!(
            asset_url("https://dl.example.com/desktop/", "Tracking-Setup-2.0.0.exe"),
            "https://dl.example.com/desktop/Tracking-Setup-2.0.0.exe"
        );
        assert_eq!(
            asset_url("https://dl.example.com/desktop", "/win/setup.exe"),
            "https://dl.example.com/desktop/win/setup.exe"
        );
        assert_eq!(
            asset_url("https://dl.example.com", "https://cdn.example.com/setup.exe"),
            "https://cdn.example.com/setup.exe"
        );
    }

    #[test]
    fn asset_file_names_stay_local() {
        assert_eq!(asset_file_name("win/Tracking-Setup.exe"), "Tracking-Setup.exe");
        assert_eq!(asset_file_name("https://cdn.example.com/a/b.AppImage?sig=1"), "b.AppImage");
        assert_eq!(asset_file_name("../.."), "update-installer");
        assert_eq!(asset_file_name(""), "update-installer");
    }

    #[test]
    fn installer_flags() {
        assert!(installer_args(false, false).is_empty());
        assert_eq!(installer_args(true, false), vec!["--silent"]);
        assert_eq!(installer_args(false, true), vec!["--force-run"]);
    }

    #[tokio::test]
    async fn download_without_release_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = crate::testing::config(dir.path());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let service = ReleaseFeedService::new(&cfg, tx).unwrap();
        service.download_update();
        assert!(matches!(rx.recv().await, Some(ServiceEvent::Error { .. })));
        assert!(matches!(
            service.quit_and_install(false, true),
            Err(UpdateError::NothingStaged)
        ));
    }

    const INSTALLER: &[u8] = b"#!/bin/sh\nexit 0\n";

    fn feed_yml(sha512: &str) -> String {
        format!(
            "version: 2.0.0\npath: Tracking-Setup-2.0.0.sh\nsha512: {sha512}\nsize: {}\nreleaseNotes: Faster map\n",
            INSTALLER.len()
        )
    }

    async fn next_terminal(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServiceEvent>,
    ) -> (ServiceEvent, Vec<f64>) {
        let mut progress = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                ServiceEvent::DownloadProgress { percent } => progress.push(percent),
                ServiceEvent::CheckingForUpdate => {}
                other => return (other, progress),
            }
        }
    }

    #[tokio::test]
    async fn checks_and_downloads_from_local_feed() {
        use base64::Engine as _;
        use sha2::{Digest, Sha512};

        let sha = base64::engine::general_purpose::STANDARD.encode(Sha512::digest(INSTALLER));
        let base = crate::testing::serve_static(vec![
            ("/updates/latest.yml", feed_yml(&sha).into_bytes()),
            ("/updates/Tracking-Setup-2.0.0.sh", INSTALLER.to_vec()),
        ])
        .await;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = crate::testing::config(dir.path());
        cfg.feed_url = format!("{base}/updates/");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let service = ReleaseFeedService::new(&cfg, tx).unwrap();

        service.check_for_updates();
        let (event, _) = next_terminal(&mut rx).await;
        let ServiceEvent::UpdateAvailable(info) = event else {
            panic!("expected update-available, got {event:?}");
        };
        assert_eq!(info.version, "2.0.0");
        assert_eq!(info.release_notes.as_deref(), Some("Faster map"));

        service.download_update();
        let (event, progress) = next_terminal(&mut rx).await;
        assert_eq!(
            event,
            ServiceEvent::UpdateDownloaded {
                version: "2.0.0".into()
            }
        );
        assert_eq!(progress.last(), Some(&100.0));
        let staged = cfg.pending_dir().join("Tracking-Setup-2.0.0.sh");
        assert_eq!(std::fs::read(&staged).unwrap(), INSTALLER);
    }

    #[tokio::test]
    async fn checksum_mismatch_discards_download() {
        let base = crate::testing::serve_static(vec![
            ("/latest.yml", feed_yml("AAAA").into_bytes()),
            ("/Tracking-Setup-2.0.0.sh", INSTALLER.to_vec()),
        ])
        .await;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = crate::testing::config(dir.path());
        cfg.feed_url = base;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let service = ReleaseFeedService::new(&cfg, tx).unwrap();

        service.check_for_updates();
        assert!(matches!(next_terminal(&mut rx).await.0, ServiceEvent::UpdateAvailable(_)));
        service.download_update();
        let (event, _) = next_terminal(&mut rx).await;
        let ServiceEvent::Error { message } = event else {
            panic!("expected error, got {event:?}");
        };
        assert!(message.contains("checksum"));
        assert!(!cfg.pending_dir().join("Tracking-Setup-2.0.0.sh").exists());
    }

    #[tokio::test]
    async fn up_to_date_and_missing_feed() {
        let yml = "version: 1.0.0\npath: setup.exe\nsha512: AAAA\n";
        let base =
            crate::testing::serve_static(vec![("/ok/latest.yml", yml.as_bytes().to_vec())]).await;
        let dir = tempfile::tempdir().unwrap();

        let mut cfg = crate::testing::config(dir.path());
        cfg.feed_url = format!("{base}/ok");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ReleaseFeedService::new(&cfg, tx).unwrap().check_for_updates();
        assert_eq!(next_terminal(&mut rx).await.0, ServiceEvent::UpdateNotAvailable);

        cfg.feed_url = format!("{base}/missing");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ReleaseFeedService::new(&cfg, tx).unwrap().check_for_updates();
        assert!(matches!(next_terminal(&mut rx).await.0, ServiceEvent::Error { .. }));
    }
}
