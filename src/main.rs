//! signage-sync: content synchronisation agent for digital signage players.
//!
//! Pulls versioned playlists and schedules from the content server, keeps a
//! verified local copy of every media file, reports device health through a
//! periodic heartbeat and executes commands pushed by the server. Playback
//! reads only what has been persisted locally, so the screen keeps running
//! through network outages.

#![warn(clippy::all)]

mod api;
mod catalog;
mod cli;
mod command;
mod config;
mod download;
mod playback;
mod retry;
mod schedule;
mod shutdown;
mod state;
mod sync;
mod systemd;
mod types;

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use fs4::fs_std::FileExt;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use api::log_sink::{RemoteLogLayer, RemoteLogSink};
use api::{HttpSignageApi, SignageApi};
use command::{CommandProcessor, HeadlessPlatform, PlayerEvent};
use config::{Config, DaemonOptions, EngineOptions, Mode};
use download::{DownloadConfig, DownloadEngine, DownloadStatus, Verification};
use playback::{PlaybackSource, PlaybackView};
use state::{SqliteStateStore, StateStore, SyncState};
use sync::heartbeat::HeartbeatLoop;
use sync::{SyncEvent, SyncOrchestrator};
use systemd::SystemdNotifier;

fn init_tracing(level: types::LogLevel, remote: Option<RemoteLogLayer>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(remote)
        .init();
}

/// Hold an exclusive lock on the data directory so two agents never write
/// the same cache and state database.
async fn acquire_lock(lock_path: &Path) -> anyhow::Result<std::fs::File> {
    let lock_path = lock_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another signage-sync instance is using this data directory (lock: {})",
                lock_path.display()
            )
        })?;
        Ok::<std::fs::File, anyhow::Error>(file)
    })
    .await?
}

/// Build an API client for the paired device.
async fn connect(config: &Config, store: &dyn StateStore) -> anyhow::Result<Arc<HttpSignageApi>> {
    let server_url = config.require_server_url()?;
    let device = store.device().await?.ok_or_else(|| {
        anyhow::anyhow!("This device is not paired. Run `signage-sync pair` first.")
    })?;
    Ok(Arc::new(HttpSignageApi::new(
        server_url,
        &device,
        config.request_timeout,
    )?))
}

fn print_sync_state(state: &SyncState) {
    match &state.last_sync_at {
        Some(at) => println!(
            "Last sync:         {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Last sync:         never"),
    }
    println!("Confirmed version: {}", state.confirmed_version);
    println!("Playlists:         {}", state.playlist_count);
    println!(
        "Content:           {} ({} cached)",
        state.content_count, state.cached_count
    );
    println!("Failed downloads:  {}", state.failed_downloads);
    if let Some(error) = &state.last_error {
        println!("Last error:        {}", error);
    }
}

/// Run the status command.
async fn run_status(config: &Config, store: &dyn StateStore) -> anyhow::Result<()> {
    match store.device().await? {
        Some(device) => {
            println!("Device:            {}", device.code);
            if let Some(store_id) = &device.store_id {
                println!("Store:             {}", store_id);
            }
        }
        None => println!("Device:            not paired"),
    }
    println!("Data directory:    {}", config.data_dir.display());
    println!();

    print_sync_state(&store.sync_state().await?);

    println!();
    println!(
        "Cache size:        {:.1} MB",
        download::cache_size_in(&config.cache_dir()).await as f64 / (1024.0 * 1024.0)
    );
    println!(
        "Queued actions:    {}",
        store.offline_action_count().await?
    );
    Ok(())
}

/// Run the now command.
async fn run_now(
    config: &Config,
    store: Arc<dyn StateStore>,
    at: Option<chrono::NaiveDateTime>,
) -> anyhow::Result<()> {
    let at = at.unwrap_or_else(|| Local::now().naive_local());
    let source = PlaybackSource::new(store, Verification::default());

    match source.current(at).await {
        PlaybackView::NoContent => println!("Nothing to play at {}", at),
        PlaybackView::Waiting(playlist) => {
            println!("{} ({}) at {}", playlist.name, playlist.id, at);
            println!("Waiting for {} item(s) to download", playlist.items.len());
        }
        PlaybackView::Playing(playlist) => {
            println!("{} ({}) at {}", playlist.name, playlist.id, at);
            for item in &playlist.items {
                let source = item
                    .local_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<24} {:<9} {:>4}s  {}",
                    item.id,
                    item.content_type.as_str(),
                    item.duration_seconds,
                    source
                );
            }
        }
    }
    Ok(())
}

/// Run the clear-cache command.
async fn run_clear_cache(config: &Config, store: &dyn StateStore, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!("This will delete every cached media file in:");
        println!("  {}", config.cache_dir().display());
        println!();
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let engine = DownloadEngine::new(DownloadConfig::new(config.cache_dir()))?;
    let files = engine.clear_cache().await?;
    let records = store.clear_all_cached().await?;
    println!("Removed {} file(s) and {} cache record(s).", files, records);
    Ok(())
}

/// Run one sync cycle in the foreground.
async fn run_sync(
    config: &Config,
    store: Arc<dyn StateStore>,
    engine: &EngineOptions,
    no_progress_bar: bool,
) -> anyhow::Result<()> {
    let api = connect(config, store.as_ref()).await?;
    let downloads = DownloadEngine::new(engine.download_config(config.cache_dir()))?;
    let orchestrator =
        SyncOrchestrator::new(api.clone(), store, downloads.clone(), api.device_code());

    let pb = download::create_progress_bar(no_progress_bar, 0);
    let mut progress = downloads.subscribe();
    let progress_task = {
        let pb = pb.clone();
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                match progress.recv().await {
                    Ok(update) => {
                        if seen.insert(update.content_id.clone()) {
                            pb.inc_length(1);
                        }
                        match update.status {
                            DownloadStatus::Completed | DownloadStatus::Failed => pb.inc(1),
                            _ => pb.set_message(format!(
                                "{} {}%",
                                update.content_id, update.progress
                            )),
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let shutdown = shutdown::install_signal_handler()?;
    let started = std::time::Instant::now();
    let state = tokio::select! {
        state = orchestrator.sync() => state,
        () = shutdown.cancelled() => {
            progress_task.abort();
            pb.abandon();
            anyhow::bail!("Sync interrupted");
        }
    };
    progress_task.abort();
    pb.finish_and_clear();

    print_sync_state(&state);
    println!("Took {}", download::format_duration(started.elapsed()));

    if let Some(error) = state.last_error {
        anyhow::bail!("Sync did not complete: {}", error);
    }
    if state.failed_downloads > 0 {
        anyhow::bail!("{} downloads failed", state.failed_downloads);
    }
    Ok(())
}

/// Run the heartbeat daemon until a signal or a restart command stops it.
async fn run_daemon(
    config: &Config,
    store: Arc<dyn StateStore>,
    opts: &DaemonOptions,
    log_sink: Option<RemoteLogSink>,
) -> anyhow::Result<()> {
    let notifier = SystemdNotifier::new(opts.notify_systemd);
    let api = connect(config, store.as_ref()).await?;
    let downloads = DownloadEngine::new(opts.engine.download_config(config.cache_dir()))?;
    let orchestrator = Arc::new(SyncOrchestrator::new(
        api.clone(),
        store.clone(),
        downloads,
        api.device_code(),
    ));
    let commands = Arc::new(CommandProcessor::new(
        orchestrator.clone(),
        store.clone(),
        api.clone(),
        Arc::new(HeadlessPlatform),
    ));

    let shutdown = shutdown::install_signal_handler()?;

    if let Some(sink) = log_sink {
        let api: Arc<dyn SignageApi> = api.clone();
        tokio::spawn(sink.run(api, shutdown.clone()));
    }

    // A restart command exits cleanly; the service manager starts us again.
    let mut player_events = commands.subscribe();
    let restart = shutdown.clone();
    tokio::spawn(async move {
        loop {
            match player_events.recv().await {
                Ok(PlayerEvent::RestartRequested) => {
                    tracing::info!("Restart requested by server, shutting down");
                    restart.cancel();
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut sync_events = orchestrator.subscribe();
    let playback = PlaybackSource::new(store.clone(), opts.engine.verification);
    tokio::spawn(async move {
        loop {
            match sync_events.recv().await {
                Ok(SyncEvent::PlaylistChanged) => {
                    match playback.current(Local::now().naive_local()).await {
                        PlaybackView::Playing(playlist) => tracing::info!(
                            playlist_id = %playlist.id,
                            items = playlist.items.len(),
                            "Now playing"
                        ),
                        PlaybackView::Waiting(playlist) => tracing::info!(
                            playlist_id = %playlist.id,
                            "Playlist waiting for downloads"
                        ),
                        PlaybackView::NoContent => tracing::info!("No content to play"),
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let heartbeat = HeartbeatLoop::new(
        api.clone(),
        store,
        orchestrator,
        commands,
        notifier,
        opts.heartbeat.clone(),
    );

    tracing::info!(
        device_code = api.device_code(),
        concurrency = opts.engine.concurrency,
        "Starting signage-sync"
    );
    notifier.notify_ready();
    heartbeat.run(shutdown).await;
    notifier.notify_stopping();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = Config::from_cli(cli)?;

    let (remote_layer, log_sink) = match &config.mode {
        Mode::Run(opts) if opts.remote_logs => {
            let (layer, sink) = api::log_sink::remote_log_channel();
            (Some(layer), Some(sink))
        }
        _ => (None, None),
    };
    init_tracing(config.log_level, remote_layer);
    tracing::debug!(?config, "Configuration loaded");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.data_dir.display()
        )
    })?;

    // Read-only commands can run next to a live daemon.
    let _lock = match &config.mode {
        Mode::Status | Mode::Now { .. } => None,
        _ => Some(acquire_lock(&config.lock_path()).await?),
    };

    let store: Arc<dyn StateStore> =
        Arc::new(SqliteStateStore::open(&config.state_db_path()).await?);

    match &config.mode {
        Mode::Pair(device) => {
            store.save_device(device).await?;
            println!("Paired as {}", device.code);
            Ok(())
        }
        Mode::Logout => {
            store.clear_device().await?;
            println!("Device identity removed.");
            Ok(())
        }
        Mode::Status => run_status(&config, store.as_ref()).await,
        Mode::Now { at } => run_now(&config, store, *at).await,
        Mode::ClearCache { yes } => run_clear_cache(&config, store.as_ref(), *yes).await,
        Mode::Sync {
            engine,
            no_progress_bar,
        } => run_sync(&config, store, engine, *no_progress_bar).await,
        Mode::Run(opts) => run_daemon(&config, store, opts, log_sink).await,
    }
}
