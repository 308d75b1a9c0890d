use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use crate::cli::{Cli, Command, EngineArgs, RunArgs};
use crate::download::{DownloadConfig, Verification};
use crate::retry::RetryPolicy;
use crate::state::Device;
use crate::sync::heartbeat::HeartbeatConfig;
use crate::types::LogLevel;

const STATE_DB_FILE: &str = "state.db";
const CACHE_DIR: &str = "cache";
const LOCK_FILE: &str = "signage-sync.lock";

/// Application configuration, resolved from the command line.
#[derive(Debug)]
pub struct Config {
    pub server_url: Option<String>,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub log_level: LogLevel,
    pub mode: Mode,
}

/// What the process was asked to do.
#[derive(Debug)]
pub enum Mode {
    Pair(Device),
    Logout,
    Run(DaemonOptions),
    Sync {
        engine: EngineOptions,
        no_progress_bar: bool,
    },
    Status,
    Now { at: Option<NaiveDateTime> },
    ClearCache { yes: bool },
}

/// Download engine settings, minus the cache location.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub wait_ceiling: Duration,
    pub verification: Verification,
}

impl EngineOptions {
    pub fn download_config(&self, cache_dir: PathBuf) -> DownloadConfig {
        DownloadConfig {
            cache_dir,
            concurrency: self.concurrency,
            retry: self.retry,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            wait_ceiling: self.wait_ceiling,
            verification: self.verification,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub engine: EngineOptions,
    pub heartbeat: HeartbeatConfig,
    pub notify_systemd: bool,
    pub remote_logs: bool,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        if cli.request_timeout == 0 {
            anyhow::bail!("--request-timeout must be at least 1 second");
        }
        let mode = match cli.command {
            Command::Pair {
                device_code,
                token,
                store_id,
            } => {
                let code = device_code.trim();
                if code.is_empty() {
                    anyhow::bail!("--device-code must not be empty");
                }
                Mode::Pair(Device {
                    code: code.to_string(),
                    auth_token: token.trim().to_string(),
                    store_id: store_id.filter(|s| !s.trim().is_empty()),
                })
            }
            Command::Logout => Mode::Logout,
            Command::Run(args) => Mode::Run(daemon_options(args)?),
            Command::Sync(args) => Mode::Sync {
                engine: engine_options(&args.engine)?,
                no_progress_bar: args.no_progress_bar,
            },
            Command::Status => Mode::Status,
            Command::Now { at } => Mode::Now {
                at: at.as_deref().map(parse_local_datetime).transpose()?,
            },
            Command::ClearCache { yes } => Mode::ClearCache { yes },
        };

        Ok(Self {
            server_url: cli.server_url.filter(|u| !u.trim().is_empty()),
            data_dir: expand_tilde(&cli.data_dir),
            request_timeout: Duration::from_secs(cli.request_timeout),
            log_level: cli.log_level,
            mode,
        })
    }

    /// Server URL, required by every command that talks to the server.
    pub fn require_server_url(&self) -> anyhow::Result<&str> {
        self.server_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--server-url (or SIGNAGE_SERVER_URL) is required"))
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join(STATE_DB_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join(CACHE_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }
}

fn engine_options(args: &EngineArgs) -> anyhow::Result<EngineOptions> {
    if args.concurrency == 0 {
        anyhow::bail!("--concurrency must be at least 1");
    }
    if args.max_attempts == 0 {
        anyhow::bail!("--max-attempts must be at least 1");
    }
    if !(args.min_size_ratio > 0.0 && args.min_size_ratio <= 1.0) {
        anyhow::bail!(
            "--min-size-ratio must be in (0, 1], got {}",
            args.min_size_ratio
        );
    }
    Ok(EngineOptions {
        concurrency: args.concurrency,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            delay: Duration::from_secs(args.retry_delay),
        },
        connect_timeout: Duration::from_secs(args.connect_timeout),
        read_timeout: Duration::from_secs(args.read_timeout),
        wait_ceiling: Duration::from_secs(args.wait_ceiling),
        verification: Verification {
            min_valid_bytes: args.min_valid_bytes,
            min_size_ratio: args.min_size_ratio,
        },
    })
}

fn daemon_options(args: RunArgs) -> anyhow::Result<DaemonOptions> {
    if args.heartbeat_interval == 0 || args.maintenance_interval == 0 {
        anyhow::bail!("--heartbeat-interval and --maintenance-interval must be at least 1 second");
    }
    Ok(DaemonOptions {
        engine: engine_options(&args.engine)?,
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(args.heartbeat_interval),
            maintenance_interval: Duration::from_secs(args.maintenance_interval),
            cache_retention: Duration::from_secs(args.cache_retention_days * 24 * 3600),
        },
        notify_systemd: args.notify_systemd,
        remote_logs: !args.no_remote_logs,
    })
}

/// Parse a local wall-clock time.
///
/// Accepts `2025-01-02T14:30:00`, `2025-01-02T14:30`, the same with a space
/// instead of `T`, or a bare date meaning midnight.
pub(crate) fn parse_local_datetime(s: &str) -> anyhow::Result<NaiveDateTime> {
    let s = s.trim();
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    anyhow::bail!(
        "Cannot parse '{}' as a local time. Expected 2025-01-02T14:30:00, \
         2025-01-02T14:30 or 2025-01-02",
        s
    )
}
