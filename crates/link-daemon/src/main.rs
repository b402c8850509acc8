use std::sync::Arc;

use link_daemon::bridge::{self, BridgeHost};
use link_daemon::core::{LinkCore, LinkEvent};
use link_daemon::http;
use link_daemon::transport::WsDialer;
use link_proto::config::Config;
use link_proto::settings::SettingsStore;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup file logging
    let data_dir = link_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,link_daemon=debug")),
        )
        .init();

    eprintln!("parachord-link: logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: all external inputs funnel into LinkCore
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel::<LinkEvent>();

    let host = BridgeHost::new();
    let dialer = Arc::new(WsDialer::new(config.desktop.url.clone()));
    let core = LinkCore::new(
        &config,
        dialer,
        Arc::new(host.clone()),
        event_tx.clone(),
        SettingsStore::new(config.daemon.settings_file.clone()),
    );
    let status = core.status();

    let _bridge_handle = bridge::start_server(
        config.bridge.bind_address.clone(),
        config.bridge.port,
        host,
        event_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            status,
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                let _ = shutdown_tx.send(LinkEvent::Shutdown);
            }
            Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
        }
    });

    info!("Link daemon initialised, desktop at {}", config.desktop.url);
    core.run(event_rx).await?;

    Ok(())
}
