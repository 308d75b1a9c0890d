use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "signage-sync",
    version,
    about = "Keep a digital signage player in sync with its content server"
)]
pub struct Cli {
    /// Base URL of the content server
    #[arg(long, env = "SIGNAGE_SERVER_URL", global = true)]
    pub server_url: Option<String>,

    /// Directory holding the state database and the media cache
    #[arg(long, default_value = "~/.signage-sync", global = true)]
    pub data_dir: String,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Timeout in seconds for API requests
    #[arg(long, default_value_t = 30, global = true)]
    pub request_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store the identity issued when this device was paired
    Pair {
        /// Device code shown in the management console
        #[arg(long)]
        device_code: String,

        /// Device token. Prefer SIGNAGE_DEVICE_TOKEN over the flag, which is
        /// visible in process listings.
        #[arg(long, env = "SIGNAGE_DEVICE_TOKEN", hide_env_values = true)]
        token: String,

        /// Store the device belongs to
        #[arg(long)]
        store_id: Option<String>,
    },

    /// Forget the stored device identity
    Logout,

    /// Run the heartbeat daemon
    Run(RunArgs),

    /// Run one sync cycle and print the result
    Sync(SyncArgs),

    /// Show the stored sync state, cache size and offline queue
    Status,

    /// Show the playlist that should be playing
    Now {
        /// Local time to resolve at (e.g. 2025-06-16T09:30:00); defaults to now
        #[arg(long)]
        at: Option<String>,
    },

    /// Delete every cached media file
    ClearCache {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Download engine tuning shared by `run` and `sync`.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Maximum simultaneous downloads
    #[arg(long, default_value_t = 3)]
    pub concurrency: usize,

    /// Attempts per file, including the first
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Seconds allowed to establish a download connection
    #[arg(long, default_value_t = 15)]
    pub connect_timeout: u64,

    /// Seconds a download may stall between reads
    #[arg(long, default_value_t = 60)]
    pub read_timeout: u64,

    /// Seconds before a download and its waiters give up
    #[arg(long, default_value_t = 300)]
    pub wait_ceiling: u64,

    /// Files smaller than this many bytes are rejected as incomplete
    #[arg(long, default_value_t = 1024)]
    pub min_valid_bytes: u64,

    /// Minimum fraction of the declared size a file must reach
    #[arg(long, default_value_t = 0.9)]
    pub min_size_ratio: f64,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 30)]
    pub heartbeat_interval: u64,

    /// Seconds between cache maintenance passes
    #[arg(long, default_value_t = 3600)]
    pub maintenance_interval: u64,

    /// Days an unused cached file is kept
    #[arg(long, default_value_t = 30)]
    pub cache_retention_days: u64,

    /// Send READY, WATCHDOG and STATUS notifications to systemd
    #[arg(long)]
    pub notify_systemd: bool,

    /// Do not ship warnings and errors to the server
    #[arg(long)]
    pub no_remote_logs: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}
