use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::SyncOrchestrator;
use crate::api::SignageApi;
use crate::command::CommandProcessor;
use crate::state::StateStore;
use crate::systemd::SystemdNotifier;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub maintenance_interval: Duration,
    pub cache_retention: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(3600),
            cache_retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Fixed-interval heartbeat driving commands, syncs and cache maintenance.
///
/// Syncs run on their own task so a long download never delays the next
/// heartbeat.
pub struct HeartbeatLoop {
    api: Arc<dyn SignageApi>,
    store: Arc<dyn StateStore>,
    orchestrator: Arc<SyncOrchestrator>,
    commands: Arc<CommandProcessor>,
    notifier: SystemdNotifier,
    config: HeartbeatConfig,
    /// Set until a cycle completes with `last_sync_at`.
    first_sync_pending: Arc<AtomicBool>,
}

impl HeartbeatLoop {
    pub fn new(
        api: Arc<dyn SignageApi>,
        store: Arc<dyn StateStore>,
        orchestrator: Arc<SyncOrchestrator>,
        commands: Arc<CommandProcessor>,
        notifier: SystemdNotifier,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            api,
            store,
            orchestrator,
            commands,
            notifier,
            config,
            first_sync_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until `shutdown` is cancelled. The first heartbeat and the first
    /// maintenance pass happen immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut heartbeat = interval(self.config.interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut maintenance = interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let first_boot = self.needs_first_sync().await;
        self.first_sync_pending.store(first_boot, Ordering::SeqCst);
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            first_boot,
            "Heartbeat loop started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = maintenance.tick() => self.maintain().await,
                _ = heartbeat.tick() => {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }
        tracing::info!("Heartbeat loop stopped");
    }

    /// No cached snapshot means nothing can play until a sync succeeds.
    async fn needs_first_sync(&self) -> bool {
        match self.store.load_snapshot().await {
            Ok(snapshot) => snapshot.is_none(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load snapshot");
                true
            }
        }
    }

    /// One heartbeat: report status, run pushed commands, flush the offline
    /// queue and start a sync when asked to (or when nothing has synced yet).
    ///
    /// Returns the spawned sync task, if any. The tick does not wait for it.
    pub async fn tick(&self) -> Option<JoinHandle<()>> {
        self.notifier.notify_watchdog();
        let info = self.orchestrator.device_info().await;

        let reply = match self.api.heartbeat(&info).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Heartbeat failed");
                self.notifier.notify_status("Offline, playing cached content");
                return None;
            }
        };
        tracing::debug!(
            sync_required = reply.sync_required,
            commands = reply.pending_commands.len(),
            "Heartbeat acknowledged"
        );

        for command in &reply.pending_commands {
            self.commands.process(command).await;
        }
        self.commands.flush_offline_queue().await;

        let sync = (reply.sync_required || self.first_sync_pending.load(Ordering::SeqCst))
            .then(|| self.spawn_sync());

        let state = self.orchestrator.last_state();
        self.notifier.notify_status(&format!(
            "Version {}, {}/{} cached",
            state.confirmed_version, state.cached_count, state.content_count
        ));
        sync.flatten()
    }

    fn spawn_sync(&self) -> Option<JoinHandle<()>> {
        if self.orchestrator.is_syncing() {
            tracing::debug!("Sync still running, not starting another");
            return None;
        }
        let orchestrator = self.orchestrator.clone();
        let first_sync_pending = self.first_sync_pending.clone();
        Some(tokio::spawn(async move {
            let state = orchestrator.sync().await;
            if state.last_sync_at.is_some() {
                first_sync_pending.store(false, Ordering::SeqCst);
            }
        }))
    }

    async fn maintain(&self) {
        let removed = self
            .orchestrator
            .downloads()
            .evict_older_than(self.config.cache_retention)
            .await;
        tracing::debug!(removed, "Cache maintenance pass finished");
    }
}
