mod archive;
mod aria2;
mod auth;
mod bot;
mod commands;
mod config;
mod drive;
mod routes;
mod state;
mod telegram;
mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mirror_core::ports::ExternalNotifier;
use mirror_core::{Collaborators, Coordinator};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archive::TarArchiver;
use crate::aria2::Aria2Client;
use crate::config::AppConfig;
use crate::drive::DriveClient;
use crate::state::AppState;
use crate::telegram::TelegramClient;
use crate::webhooks::WebhookNotifier;

const EVENT_POLL_EVERY: Duration = Duration::from_secs(1);
const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let daemon = Arc::new(Aria2Client::new(
        &cfg.aria_rpc_url,
        cfg.aria_secret.clone(),
        cfg.download_location.clone(),
    ));
    let telegram = Arc::new(TelegramClient::new(&cfg.telegram_token));

    // --- Startup health checks (fail fast) ---
    startup_checks(&daemon, &telegram).await?;

    tokio::fs::create_dir_all(&cfg.download_location)
        .await
        .with_context(|| format!("Failed to create {}", cfg.download_location.display()))?;

    let drive = Arc::new(DriveClient::new(
        cfg.gdrive_client_id.clone(),
        cfg.gdrive_client_secret.clone(),
        cfg.gdrive_refresh_token.clone(),
    ));
    let notifier = cfg.webhook_url.clone().map(|url| {
        info!(url=%url, "webhook: enabled");
        Arc::new(WebhookNotifier::new(url, cfg.webhook_secret.clone())) as Arc<dyn ExternalNotifier>
    });

    let coordinator = Coordinator::new(
        cfg.settings(),
        Collaborators {
            daemon: daemon.clone(),
            chat: telegram.clone(),
            storage: drive.clone(),
            archiver: Arc::new(TarArchiver),
            notifier,
        },
    );

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(aria2::run_event_poller(daemon, events_tx, EVENT_POLL_EVERY, cancel.clone()));
    coordinator.spawn_event_loop(events_rx);

    let bind_addr = cfg.bind_addr.clone();
    let app_state = Arc::new(AppState::new(coordinator, telegram, drive, cfg));
    tokio::spawn(bot::run_update_loop(app_state.clone(), cancel.clone()));

    let app = routes::router(app_state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("mirror-bot debug surface on http://{bind_addr}");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    Ok(())
}

async fn startup_checks(aria2: &Aria2Client, telegram: &TelegramClient) -> Result<()> {
    let version = aria2.get_version().await.context("aria2 RPC unreachable")?;
    info!(version=%version, "aria2: ok");

    let me = telegram.get_me().await.context("Telegram getMe failed")?;
    info!(bot=%me.username.unwrap_or(me.first_name), "telegram: ok");

    Ok(())
}
