//! Automatic sync at application start/stop, and manual runs
//!
//! Every entry point takes the settings explicitly and only touches the
//! watermarks after a successful run. Saving the settings afterwards is the
//! caller's job.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use super::{ProgressSink, SyncDirection, SyncMode, SyncOrchestrator, SyncResult};
use crate::error::Result;
use crate::settings::SyncSettings;
use crate::types::Category;

/// The three user-triggered sync actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualSync {
    /// Push everything (full)
    Push,
    /// Pull everything (full)
    Pull,
    /// Push, then pull (full)
    Both,
}

impl ManualSync {
    pub fn direction(&self) -> SyncDirection {
        match self {
            ManualSync::Push => SyncDirection::PushOnly,
            ManualSync::Pull => SyncDirection::PullOnly,
            ManualSync::Both => SyncDirection::Both,
        }
    }
}

/// What an automatic sync did
#[derive(Debug, Default)]
pub struct LifecycleReport {
    /// False when the hook was disabled or not signed in
    pub ran: bool,
    /// Every run succeeded and the watermark moved
    pub success: bool,
    pub results: Vec<SyncResult>,
}

impl LifecycleReport {
    fn skipped(reason: &str) -> Self {
        info!("Automatic sync skipped: {}", reason);
        Self::default()
    }
}

/// Start/stop hooks around a shared orchestrator
pub struct LifecyclePolicy {
    orchestrator: Arc<SyncOrchestrator>,
}

impl LifecyclePolicy {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    fn can_run(settings: &SyncSettings) -> std::result::Result<(), &'static str> {
        if !settings.enabled {
            return Err("sync is disabled");
        }
        if !settings.is_authenticated() {
            return Err("not signed in");
        }
        Ok(())
    }

    /// Pull at startup.
    ///
    /// Templates come down first so the last layout is ready immediately;
    /// the other enabled categories are then pulled concurrently. Failures
    /// are logged and swallowed; the application keeps its local files.
    pub async fn on_start(&self, settings: &mut SyncSettings) -> LifecycleReport {
        if let Err(reason) = Self::can_run(settings) {
            return LifecycleReport::skipped(reason);
        }
        if !settings.sync_on_start {
            return LifecycleReport::skipped("sync on start is off");
        }

        let snapshot = settings.clone();
        let enabled = snapshot.enabled_categories();
        let mut results = Vec::new();

        if enabled.contains(&Category::Templates) {
            let templates = self
                .orchestrator
                .run_categories(
                    &snapshot,
                    &[Category::Templates],
                    SyncDirection::PullOnly,
                    SyncMode::Full,
                    None,
                )
                .await;
            if !templates.success {
                warn!("Startup pull of Templates failed: {}", templates.message);
            }
            results.push(templates);
        }

        let rest: Vec<Category> = enabled
            .into_iter()
            .filter(|c| *c != Category::Templates)
            .collect();
        let pulls = rest.iter().map(|category| {
            self.orchestrator.run_categories(
                &snapshot,
                std::slice::from_ref(category),
                SyncDirection::PullOnly,
                SyncMode::Full,
                None,
            )
        });
        for result in join_all(pulls).await {
            if !result.success {
                warn!("Startup pull failed: {}", result.message);
            }
            results.push(result);
        }

        let success = results.iter().all(|r| r.success);
        if success {
            if let Some(started) = results.iter().map(|r| r.started_at).min() {
                settings.record_success(SyncDirection::PullOnly, started);
            }
            info!("Startup sync complete ({} run(s))", results.len());
        }

        LifecycleReport {
            ran: true,
            success,
            results,
        }
    }

    /// Push edits made during the session before the process exits.
    ///
    /// Incremental from the last push; failures are logged and swallowed.
    pub async fn on_stop(&self, settings: &mut SyncSettings) -> LifecycleReport {
        if let Err(reason) = Self::can_run(settings) {
            return LifecycleReport::skipped(reason);
        }
        if !settings.sync_on_stop {
            return LifecycleReport::skipped("sync on stop is off");
        }

        let result = self
            .orchestrator
            .run(
                settings,
                SyncDirection::PushOnly,
                SyncMode::Incremental,
                None,
            )
            .await;

        if result.success {
            settings.record_success(SyncDirection::PushOnly, result.started_at);
        } else {
            warn!("Shutdown push failed: {}", result.message);
        }

        LifecycleReport {
            ran: true,
            success: result.success,
            results: vec![result],
        }
    }

    /// Run a manual full sync and return its result for display
    pub async fn sync_now(
        &self,
        settings: &mut SyncSettings,
        action: ManualSync,
        progress: Option<&dyn ProgressSink>,
    ) -> SyncResult {
        let direction = action.direction();
        if !settings.is_authenticated() {
            return SyncResult::not_attempted(
                direction,
                SyncMode::Full,
                "Sign in to a cloud account before synchronizing",
            );
        }

        let result = self
            .orchestrator
            .run(settings, direction, SyncMode::Full, progress)
            .await;
        if result.success {
            settings.record_success(direction, result.started_at);
        }
        result
    }

    /// Check that the remote store accepts the current credentials
    pub async fn check_connection(&self) -> bool {
        self.orchestrator.store().test_connection().await
    }

    /// Revoke the token remotely and forget it locally.
    ///
    /// The local credentials are cleared even when the revoke call fails.
    pub async fn disconnect(&self, settings: &mut SyncSettings) -> Result<()> {
        let revoked = self.orchestrator.store().revoke_token().await;
        settings.sign_out();
        revoked
    }
}
