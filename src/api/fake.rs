//! In-memory [`SignageApi`] double shared by orchestrator, heartbeat and
//! command tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    ApiError, CommandReport, ConfirmResponse, DeviceInfo, HeartbeatResponse, LogEntry,
    PullResponse, SignageApi,
};

fn unavailable(endpoint: &str) -> ApiError {
    ApiError::HttpStatus {
        status: 503,
        endpoint: endpoint.to_string(),
    }
}

pub(crate) struct FakeApi {
    pub healthy: Mutex<bool>,
    /// `None` makes the pull fail.
    pub pull: Mutex<Option<PullResponse>>,
    pub pull_delay: Mutex<Duration>,
    pub confirm_ok: Mutex<bool>,
    /// `None` makes the heartbeat fail.
    pub heartbeat: Mutex<Option<HeartbeatResponse>>,
    pub report_ok: Mutex<bool>,
    pub calls: Mutex<Vec<&'static str>>,
    pub confirmed: Mutex<Vec<(u64, Option<String>)>>,
    pub reports: Mutex<Vec<CommandReport>>,
    pub heartbeats: Mutex<Vec<DeviceInfo>>,
}

impl FakeApi {
    /// A reachable server with nothing assigned.
    pub fn online() -> Self {
        Self {
            healthy: Mutex::new(true),
            pull: Mutex::new(None),
            pull_delay: Mutex::new(Duration::ZERO),
            confirm_ok: Mutex::new(true),
            heartbeat: Mutex::new(Some(HeartbeatResponse::default())),
            report_ok: Mutex::new(true),
            calls: Mutex::new(Vec::new()),
            confirmed: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            heartbeats: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pull(self, pull: PullResponse) -> Self {
        *self.pull.lock().unwrap() = Some(pull);
        self
    }

    pub fn set_pull(&self, pull: Option<PullResponse>) {
        *self.pull.lock().unwrap() = pull;
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SignageApi for FakeApi {
    async fn check_health(&self) -> Result<(), ApiError> {
        self.record("health");
        if *self.healthy.lock().unwrap() {
            Ok(())
        } else {
            Err(unavailable("health"))
        }
    }

    async fn heartbeat(&self, info: &DeviceInfo) -> Result<HeartbeatResponse, ApiError> {
        self.record("heartbeat");
        self.heartbeats.lock().unwrap().push(info.clone());
        let reply = self.heartbeat.lock().unwrap().clone();
        reply.ok_or_else(|| unavailable("heartbeat"))
    }

    async fn pull_playlist(&self) -> Result<PullResponse, ApiError> {
        self.record("pull");
        let delay = *self.pull_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let pull = self.pull.lock().unwrap().clone();
        pull.ok_or_else(|| unavailable("pull"))
    }

    async fn confirm_sync(
        &self,
        version: u64,
        playlist_id: Option<&str>,
    ) -> Result<ConfirmResponse, ApiError> {
        self.record("confirm");
        if !*self.confirm_ok.lock().unwrap() {
            return Err(unavailable("confirm"));
        }
        self.confirmed
            .lock()
            .unwrap()
            .push((version, playlist_id.map(str::to_string)));
        Ok(ConfirmResponse {
            confirmed_version: version,
            synced_at: Some(Utc::now()),
        })
    }

    async fn report_command_result(&self, report: &CommandReport) -> Result<(), ApiError> {
        self.record("report");
        if !*self.report_ok.lock().unwrap() {
            return Err(unavailable("report"));
        }
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn send_log(&self, _entry: &LogEntry) -> Result<(), ApiError> {
        self.record("log");
        Ok(())
    }
}
