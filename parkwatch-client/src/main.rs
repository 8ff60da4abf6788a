/*
 * PARKWATCH - Console du client d'occupation
 *
 * RÔLE : Charger la configuration une fois, se connecter, puis journaliser
 * connectivité, résumés d'occupation et avis de sortie jusqu'à Ctrl-C.
 *
 * ENV : PARKWATCH_CONFIG (défaut `config.json`), RUST_LOG, `.env` via dotenvy.
 */

use anyhow::Context;
use parkwatch::{load_config, ConnectionEvent, Notice, ParkingClient, TransportConfig, TransportConnector};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "PARKWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut client = ParkingClient::resolve(
        load_config(&path, TransportConfig::default()),
        Arc::new(TransportConnector),
    )
    .await;

    client
        .start()
        .with_context(|| format!("cannot connect to {}", client.config().endpoint))?;

    let handle = client.handle();
    let mut notices = handle.subscribe_notices();
    let reporter = handle.clone();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(Notice::Connection(ConnectionEvent::StateChanged(_))) => {
                    let bar = reporter.status_bar();
                    info!("{} | {}", bar.connection_label, bar.mode_label);
                }
                Ok(Notice::Connection(ConnectionEvent::ConnectivityChanged(true))) => {
                    let stats = reporter.stats();
                    info!(
                        "occupied {} / available {} / revenue {}",
                        stats.occupied_count, stats.available_count, stats.revenue
                    );
                }
                Ok(Notice::VehicleExited(exit)) => {
                    info!(
                        "exit {} at {}: {} min, {} VNĐ",
                        exit.license_plate.as_deref().unwrap_or("?"),
                        exit.location.as_deref().unwrap_or("?"),
                        exit.final_duration_minutes.unwrap_or_default(),
                        parkwatch::view::format_currency(exit.final_cost.unwrap_or_default())
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("skipped {n} notices"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = client.run() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for Ctrl-C")?;
            info!("shutting down");
        }
    }
    handle.stop();
    info!("health: {}", serde_json::to_string(&handle.health())?);
    Ok(())
}
