mod action;
mod app_state;
mod artwork;
mod assets;
mod core;
mod engine;
mod favorites;
mod http;
mod metadata;
mod mpv;
mod playback;
mod poller;
mod reorder;
mod scheduler;
#[cfg(test)]
mod test_support;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use cast_proto::channels::{load_channels_from_toml, ChannelTable};
use cast_proto::profiles::ProfileManager;
use cast_proto::protocol::Endpoints;
use cast_proto::store::open_persistence;
use tokio::sync::mpsc;

use crate::assets::AssetCache;
use crate::core::{ClientCore, CoreEvent, PollIntervals};
use crate::engine::{AudioOutput, EngineFactory, NoEngine, NullOutput};
use crate::favorites::FavoritesReconciler;
use crate::metadata::HttpMetadataClient;
use crate::mpv::{MpvDriver, MpvEngineFactory, MpvOutput};
use crate::playback::PlaybackController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = cast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("client.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG wins; otherwise keep HTTP client internals quiet.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,cast_client=debug,hyper_util=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("seriouscast log: {}", log_path.display());
    tracing::info!("seriouscast starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = cast_proto::config::Config::load().unwrap_or_default();
    let endpoints = Endpoints::new(&config.server.base_url);

    let table = match load_channels_from_toml(&config.channels.channels_toml) {
        Ok(t) => {
            tracing::info!("loaded {} channels", t.len());
            t
        }
        Err(e) => {
            tracing::warn!(
                "no channel table at {:?}: {:#}",
                config.channels.channels_toml,
                e
            );
            ChannelTable::default()
        }
    };

    // ── Persistence ──────────────────────────────────────────────────────────
    let profiles = ProfileManager::new(open_persistence(&config.storage));
    let volume = profiles
        .backend()
        .volume()
        .unwrap_or(config.playback.default_volume);

    // ── Network ──────────────────────────────────────────────────────────────
    let http_client = HttpMetadataClient::build_client()?;
    let metadata = Arc::new(HttpMetadataClient::new(
        http_client.clone(),
        endpoints.clone(),
    ));

    let assets = Arc::new(AssetCache::new(
        &config.storage.cache_dir,
        endpoints.clone(),
        http_client,
    ));
    match assets.activate() {
        Ok(0) => {}
        Ok(n) => tracing::info!("removed {} stale asset caches", n),
        Err(e) => tracing::warn!("asset cache cleanup failed: {:#}", e),
    }
    {
        let assets = assets.clone();
        tokio::spawn(async move {
            if let Err(e) = assets.install().await {
                tracing::warn!("asset pre-cache incomplete: {:#}", e);
            }
        });
    }

    // ── CoreEvent channel (HTTP/pollers/mpv → ClientCore) ────────────────────
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(1024);

    // ── Player ───────────────────────────────────────────────────────────────
    let mut driver = MpvDriver::new(volume);
    let (mpv_tx, mpv_rx) = mpsc::channel(256);
    let (output, factory): (Box<dyn AudioOutput>, Box<dyn EngineFactory>) =
        match driver.spawn_and_connect(mpv_tx).await {
            Ok(handle) => {
                if let Err(e) = mpv::configure(&handle).await {
                    tracing::warn!("mpv configure failed: {:#}", e);
                }
                let active = Arc::new(AtomicU64::new(0));
                mpv::spawn_event_bridge(mpv_rx, active.clone(), event_tx.clone());
                (
                    Box::new(MpvOutput::new(Some(handle.clone()), config.playback.native_hls)),
                    Box::new(MpvEngineFactory::new(Some(handle), active)),
                )
            }
            Err(e) => {
                tracing::error!("mpv unavailable, playback disabled: {:#}", e);
                (Box::new(NullOutput::default()), Box::new(NoEngine))
            }
        };
    let playback = PlaybackController::new(output, factory, endpoints.clone(), volume);

    // ── Build ClientCore ─────────────────────────────────────────────────────
    let mut client_core = ClientCore::new(
        profiles,
        FavoritesReconciler::new(table),
        playback,
        endpoints,
        metadata,
        Some(assets),
        PollIntervals::from_config(&config.polling),
        event_tx.clone(),
    );
    client_core.start();

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            client_core.subscribe(),
            event_tx.clone(),
        );
    }

    // ── Ctrl-C → orderly shutdown ────────────────────────────────────────────
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                let _ = event_tx.send(CoreEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    if let Err(e) = client_core.run(event_rx).await {
        tracing::error!("ClientCore exited with error: {}", e);
    }

    if driver.process_alive() {
        driver.kill().await;
    }
    tracing::info!("seriouscast stopped");
    Ok(())
}
