//! Runs the folder syncer across every enabled category

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use super::{
    FolderReport, FolderSyncer, SyncDirection, SyncEvent, SyncLocks, SyncMode, SyncResult,
};
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::settings::SyncSettings;
use crate::types::Category;

/// Receiver for human-readable progress lines
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

impl ProgressSink for UnboundedSender<String> {
    fn report(&self, message: &str) {
        // Nobody listening any more
        let _ = self.send(message.to_string());
    }
}

fn log_finished(result: &SyncResult) {
    let event = SyncEvent::from(result);
    info!(
        run_id = %event.run_id,
        direction = %event.direction,
        success = event.success,
        files_transferred = event.files_transferred,
        error = event.error.as_deref().unwrap_or(""),
        "{}",
        result.message
    );
}

/// Drives category syncs against one remote store and data root
pub struct SyncOrchestrator {
    store: Arc<dyn RemoteStore>,
    data_root: PathBuf,
    locks: SyncLocks,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn RemoteStore>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            data_root: data_root.into(),
            locks: SyncLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn locks(&self) -> &SyncLocks {
        &self.locks
    }

    /// Synchronize every category enabled in `settings`.
    ///
    /// The first category-level error stops the run; categories after it are
    /// not attempted.
    pub async fn run(
        &self,
        settings: &SyncSettings,
        direction: SyncDirection,
        mode: SyncMode,
        progress: Option<&dyn ProgressSink>,
    ) -> SyncResult {
        let categories = settings.enabled_categories();
        self.run_categories(settings, &categories, direction, mode, progress)
            .await
    }

    /// Synchronize the given categories, in order
    pub async fn run_categories(
        &self,
        settings: &SyncSettings,
        categories: &[Category],
        direction: SyncDirection,
        mode: SyncMode,
        progress: Option<&dyn ProgressSink>,
    ) -> SyncResult {
        let mut result = SyncResult::begin(direction, mode);
        let cutoff = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => settings.cutoff_for(direction),
        };
        let phrases = direction.phrases();

        info!(
            run_id = %result.run_id,
            "Starting {} sync ({:?}) of {} categor{}",
            direction,
            mode,
            categories.len(),
            if categories.len() == 1 { "y" } else { "ies" }
        );

        for &category in categories {
            if let Some(sink) = progress {
                sink.report(&phrases.progress(category));
            }

            match self.sync_category(category, direction, mode, cutoff).await {
                Ok(report) => {
                    result.categories.insert(category, report);
                }
                Err(e) => {
                    let e = e.in_category(category);
                    error!(run_id = %result.run_id, "{}", e.diagnostic());
                    result.fail(format!("Sync failed while processing {}", category), e);
                    log_finished(&result);
                    if let Some(sink) = progress {
                        sink.report(&result.message);
                    }
                    return result;
                }
            }
        }

        result.complete();
        log_finished(&result);
        if let Some(sink) = progress {
            sink.report(&result.message);
        }
        result
    }

    /// Synchronize one category while holding its lock
    pub async fn sync_category(
        &self,
        category: Category,
        direction: SyncDirection,
        mode: SyncMode,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<FolderReport> {
        if self.locks.is_busy(category) {
            info!("{} is already syncing; waiting for that run to finish", category);
        }
        let _guard = self.locks.acquire(category).await;
        FolderSyncer::new(self.store.as_ref())
            .sync(
                &category.local_dir(&self.data_root),
                &category.remote_dir(),
                direction,
                mode,
                cutoff,
            )
            .await
    }
}
