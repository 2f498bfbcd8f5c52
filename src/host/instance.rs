//! Single-instance enforcement.
//!
//! The primary instance holds an exclusive lock on `<data>/instance.lock` for
//! its whole lifetime and publishes its IPC port next to it. A second launch
//! fails to take the lock, asks the primary to focus its window and exits.

use crate::ipc::{self, IpcRequest};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub enum InstanceRole {
    Primary(InstanceGuard),
    Secondary,
}

/// Keeps the lock file locked; removes the published port on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    _file: File,
    port_path: PathBuf,
}

impl InstanceGuard {
    pub fn publish_port(&self, port: u16) -> Result<()> {
        std::fs::write(&self.port_path, port.to_string())
            .with_context(|| format!("write {}", self.port_path.display()))
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.port_path);
    }
}

pub fn acquire(lock_path: &Path, port_path: &Path) -> Result<InstanceRole> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("open {}", lock_path.display()))?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(InstanceRole::Primary(InstanceGuard {
            _file: file,
            port_path: port_path.to_path_buf(),
        })),
        Err(err) if is_contended(&err) => Ok(InstanceRole::Secondary),
        Err(err) => Err(err).with_context(|| format!("lock {}", lock_path.display())),
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Ask the running primary to bring its window forward.
pub async fn hand_off(port_path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(port_path)
        .await
        .with_context(|| format!("read {}", port_path.display()))?;
    let port: u16 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid port in {}", port_path.display()))?;
    let response = ipc::call(port, &IpcRequest::Focus).await?;
    if !response.ok {
        anyhow::bail!(
            "primary instance refused focus: {}",
            response.error.unwrap_or_default()
        );
    }
    Ok(())
}
