//! Sync settings and their persisted JSON record
//!
//! Settings are an explicit value handed to every sync call. Nothing here is
//! global: callers load a [`SyncSettings`], pass it in, and save it back
//! through a [`SettingsStore`] after a run that changed it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TetherError};
use crate::sync::SyncDirection;
use crate::types::Category;

/// Accept `null` wherever a value with a default is expected
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// User-facing sync configuration plus the three watermarks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Master switch
    #[serde(deserialize_with = "null_as_default")]
    pub enabled: bool,
    /// Stored access token; empty or absent means signed out
    pub auth_token: Option<String>,
    /// Account label shown to the user
    pub account_name: Option<String>,
    /// Per-category enable flags; absent categories are disabled
    #[serde(deserialize_with = "null_as_default")]
    pub per_category_enabled: BTreeMap<Category, bool>,
    /// Pull on application start
    #[serde(deserialize_with = "null_as_default")]
    pub sync_on_start: bool,
    /// Push on application stop
    #[serde(deserialize_with = "null_as_default")]
    pub sync_on_stop: bool,
    /// Last successful run in both directions
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last successful run that pushed
    pub last_push_time: Option<DateTime<Utc>>,
    /// Last successful run that pulled
    pub last_pull_time: Option<DateTime<Utc>>,
}

/// Move a watermark forward, never backward
fn advance(slot: &mut Option<DateTime<Utc>>, to: DateTime<Utc>) {
    match slot {
        Some(current) if *current >= to => {}
        _ => *slot = Some(to),
    }
}

impl SyncSettings {
    /// Whether a usable credential is stored
    pub fn is_authenticated(&self) -> bool {
        self.auth_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn is_category_enabled(&self, category: Category) -> bool {
        self.per_category_enabled
            .get(&category)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_category_enabled(&mut self, category: Category, enabled: bool) {
        self.per_category_enabled.insert(category, enabled);
    }

    /// Enabled categories in [`Category::ALL`] order
    pub fn enabled_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.is_category_enabled(*c))
            .collect()
    }

    /// Incremental cutoff for a run in `direction`
    pub fn cutoff_for(&self, direction: SyncDirection) -> Option<DateTime<Utc>> {
        match direction {
            SyncDirection::PushOnly => self.last_push_time,
            SyncDirection::PullOnly => self.last_pull_time,
            SyncDirection::Both => self.last_sync_time,
        }
    }

    /// Record a successful run in `direction` that started at `at`.
    ///
    /// A two-way run covers both single-direction watermarks as well.
    pub fn record_success(&mut self, direction: SyncDirection, at: DateTime<Utc>) {
        if direction.pushes() {
            advance(&mut self.last_push_time, at);
        }
        if direction.pulls() {
            advance(&mut self.last_pull_time, at);
        }
        if direction == SyncDirection::Both {
            advance(&mut self.last_sync_time, at);
        }
    }

    /// Forget credentials; watermarks and category choices are kept
    pub fn sign_out(&mut self) {
        self.auth_token = None;
        self.account_name = None;
    }
}

/// Loads and saves [`SyncSettings`] as a JSON file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file yields the disabled defaults
    pub fn load(&self) -> Result<SyncSettings> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(SyncSettings::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {}, using defaults", self.path.display());
                Ok(SyncSettings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write settings atomically (temp file, then rename)
    pub fn save(&self, settings: &SyncSettings) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                TetherError::Config(format!("Invalid settings path: {}", self.path.display()))
            })?
            .to_string_lossy();
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
