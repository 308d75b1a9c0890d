//! Server-pushed command execution.
//!
//! Every command produces a [`CommandResult`], is reported to the server and
//! is broadcast as a [`PlayerEvent`]. Unknown names are a structured failure,
//! never an error. Reports that can't be delivered go to the offline queue
//! and are retried after the next successful heartbeat.

pub mod platform;

use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::api::{Command, CommandReport, CommandStatus, SignageApi};
use crate::state::{OfflineActionKind, StateStore};
use crate::sync::SyncOrchestrator;

pub use self::platform::{HeadlessPlatform, Platform, PlatformError, Screenshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Queued actions delivered per flush.
const OFFLINE_FLUSH_BATCH: u32 = 50;
/// Queued actions are dropped after this many failed deliveries.
const MAX_OFFLINE_ATTEMPTS: u32 = 10;

/// Commands this player understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Sync,
    ClearCache,
    UpdateSettings,
    Restart,
    Screenshot,
    DeviceInfo,
}

impl CommandKind {
    /// Match a wire name case-insensitively, treating `-` as `_`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "SYNC_NOW" | "SYNC" | "REFRESH" | "REFRESH_CONTENT" => Some(Self::Sync),
            "CLEAR_CACHE" => Some(Self::ClearCache),
            "UPDATE_SETTINGS" => Some(Self::UpdateSettings),
            "RESTART" | "RESTART_APP" | "REBOOT" => Some(Self::Restart),
            "SCREENSHOT" | "TAKE_SCREENSHOT" => Some(Self::Screenshot),
            "DEVICE_INFO" | "GET_DEVICE_INFO" | "GET_INFO" => Some(Self::DeviceInfo),
            _ => None,
        }
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub payload: Option<Value>,
}

impl CommandResult {
    fn ok(message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: None,
        }
    }
}

/// Notifications for the playback side.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    CommandExecuted {
        command_id: String,
        command: String,
        result: CommandResult,
    },
    SettingsUpdated(Map<String, Value>),
    /// The process should exit so the service manager restarts it.
    RestartRequested,
}

pub struct CommandProcessor {
    orchestrator: Arc<SyncOrchestrator>,
    store: Arc<dyn StateStore>,
    api: Arc<dyn SignageApi>,
    platform: Arc<dyn Platform>,
    events: broadcast::Sender<PlayerEvent>,
}

impl CommandProcessor {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        store: Arc<dyn StateStore>,
        api: Arc<dyn SignageApi>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            orchestrator,
            store,
            api,
            platform,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Execute `command`, report the result and broadcast it.
    ///
    /// Safe to call again for a re-delivered command id.
    pub async fn process(&self, command: &Command) -> CommandResult {
        let kind = CommandKind::parse(&command.command);
        tracing::info!(command_id = %command.id, command = %command.command, "Executing command");

        let result = match kind {
            Some(kind) => self.execute(kind, command.payload.as_ref()).await,
            None => CommandResult::failed(format!("Unknown command: {}", command.command)),
        };
        if result.success {
            tracing::info!(command_id = %command.id, message = %result.message, "Command succeeded");
        } else {
            tracing::warn!(command_id = %command.id, message = %result.message, "Command failed");
        }

        self.report(command, &result).await;
        let _ = self.events.send(PlayerEvent::CommandExecuted {
            command_id: command.id.clone(),
            command: command.command.clone(),
            result: result.clone(),
        });
        if kind == Some(CommandKind::Restart) {
            let _ = self.events.send(PlayerEvent::RestartRequested);
        }
        result
    }

    async fn execute(&self, kind: CommandKind, payload: Option<&Value>) -> CommandResult {
        match kind {
            CommandKind::Sync => self.sync_now().await,
            CommandKind::ClearCache => self.clear_cache().await,
            CommandKind::UpdateSettings => self.update_settings(payload).await,
            CommandKind::Restart => CommandResult::ok("Restart scheduled", None),
            CommandKind::Screenshot => self.screenshot().await,
            CommandKind::DeviceInfo => {
                let info = self.orchestrator.device_info().await;
                match serde_json::to_value(&info) {
                    Ok(value) => CommandResult::ok("Device info collected", Some(value)),
                    Err(e) => CommandResult::failed(format!("Failed to encode device info: {e}")),
                }
            }
        }
    }

    async fn sync_now(&self) -> CommandResult {
        let state = self.orchestrator.sync().await;
        let payload = Some(json!({ "sync_state": state }));
        if state.is_syncing {
            return CommandResult::ok("Sync already in progress", payload);
        }
        match &state.last_error {
            None => CommandResult::ok("Sync completed", payload),
            Some(e) => CommandResult {
                success: false,
                message: format!("Sync failed: {e}"),
                payload,
            },
        }
    }

    async fn clear_cache(&self) -> CommandResult {
        let removed = match self.orchestrator.downloads().clear_cache().await {
            Ok(n) => n,
            Err(e) => return CommandResult::failed(format!("Failed to clear cache: {e}")),
        };
        if let Err(e) = self.store.clear_all_cached().await {
            return CommandResult::failed(format!("Failed to clear cache records: {e}"));
        }
        let state = self.orchestrator.sync().await;
        CommandResult::ok(
            format!("Cleared {removed} cached files"),
            Some(json!({ "removed_files": removed, "sync_state": state })),
        )
    }

    async fn update_settings(&self, payload: Option<&Value>) -> CommandResult {
        let Some(patch) = payload.and_then(Value::as_object) else {
            return CommandResult::failed("UPDATE_SETTINGS requires an object payload");
        };
        match self.store.merge_settings(patch).await {
            Ok(merged) => {
                let _ = self.events.send(PlayerEvent::SettingsUpdated(merged.clone()));
                CommandResult::ok(
                    format!("Updated {} settings", patch.len()),
                    Some(json!({ "settings": merged })),
                )
            }
            Err(e) => CommandResult::failed(format!("Failed to save settings: {e}")),
        }
    }

    async fn screenshot(&self) -> CommandResult {
        match self.platform.capture_screenshot().await {
            Ok(shot) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&shot.data);
                CommandResult::ok(
                    "Screenshot captured",
                    Some(json!({ "image_base64": encoded, "format": shot.format })),
                )
            }
            Err(e) => CommandResult::failed(e.to_string()),
        }
    }

    /// Send the result to the server, queueing it when the server is
    /// unreachable.
    async fn report(&self, command: &Command, result: &CommandResult) {
        let report = CommandReport {
            command_id: command.id.clone(),
            status: if result.success {
                CommandStatus::Success
            } else {
                CommandStatus::Failed
            },
            message: result.message.clone(),
            payload: result.payload.clone(),
        };
        let Err(e) = self.api.report_command_result(&report).await else {
            return;
        };
        if !e.is_network() {
            tracing::warn!(command_id = %command.id, error = %e, "Command report rejected");
            return;
        }
        tracing::info!(command_id = %command.id, error = %e, "Server unreachable, queueing command report");
        let queued = match serde_json::to_value(&report) {
            Ok(value) => self
                .store
                .push_offline_action(OfflineActionKind::CommandResult, &value)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = queued {
            tracing::error!(command_id = %command.id, error = %e, "Failed to queue command report");
        }
    }

    /// Deliver queued reports, oldest first. Returns how many were delivered.
    ///
    /// Stops at the first network failure; the rest wait for the next call.
    pub async fn flush_offline_queue(&self) -> usize {
        let actions = match self.store.pending_offline_actions(OFFLINE_FLUSH_BATCH).await {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read offline queue");
                return 0;
            }
        };

        let mut delivered = 0;
        for action in actions {
            let report: CommandReport = match serde_json::from_value(action.payload.clone()) {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(action_id = action.id, error = %e, "Dropping undecodable offline action");
                    self.remove_action(action.id).await;
                    continue;
                }
            };
            match self.api.report_command_result(&report).await {
                Ok(()) => {
                    self.remove_action(action.id).await;
                    delivered += 1;
                }
                Err(e) => {
                    let attempts = match self.store.bump_offline_action_attempts(action.id).await {
                        Ok(n) => n,
                        Err(se) => {
                            tracing::warn!(action_id = action.id, error = %se, "Failed to update offline action");
                            action.attempts + 1
                        }
                    };
                    if attempts >= MAX_OFFLINE_ATTEMPTS {
                        tracing::warn!(
                            action_id = action.id,
                            command_id = %report.command_id,
                            attempts,
                            "Dropping offline action after repeated failures"
                        );
                        self.remove_action(action.id).await;
                    }
                    if e.is_network() {
                        break;
                    }
                }
            }
        }
        if delivered > 0 {
            tracing::info!(delivered, "Flushed offline queue");
        }
        delivered
    }

    async fn remove_action(&self, id: i64) {
        if let Err(e) = self.store.remove_offline_action(id).await {
            tracing::warn!(action_id = id, error = %e, "Failed to remove offline action");
        }
    }
}
