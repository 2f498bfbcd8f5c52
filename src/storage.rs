//! Persisted update preferences (skipped versions).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePrefs {
    #[serde(default)]
    pub skipped_versions: BTreeSet<String>,
    #[serde(default)]
    pub updated_utc: Option<String>,
}

pub struct PrefsStore {
    path: PathBuf,
}

impl PrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load preferences; a missing or unreadable file yields defaults.
    pub fn load(&self) -> UpdatePrefs {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring corrupt update prefs");
                UpdatePrefs::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UpdatePrefs::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot read update prefs");
                UpdatePrefs::default()
            }
        }
    }

    pub fn set_skipped(&self, version: &str, skipped: bool) -> Result<UpdatePrefs> {
        let mut prefs = self.load();
        let changed = if skipped {
            prefs.skipped_versions.insert(version.to_string())
        } else {
            prefs.skipped_versions.remove(version)
        };
        if changed {
            prefs.updated_utc = Some(now_utc());
            self.save(&prefs)?;
        }
        Ok(prefs)
    }

    fn save(&self, prefs: &UpdatePrefs) -> Result<()> {
        let content = serde_json::to_string_pretty(prefs)?;
        write_atomic(&self.path, &content)
            .with_context(|| format!("write {}", self.path.display()))
    }
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

fn now_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
