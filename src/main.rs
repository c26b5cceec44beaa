use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use venue_sync::config::ReconcileConfig;
use venue_sync::model::ReservationFilter;
use venue_sync::reconcile::{ReconciledView, Reconciler, ViewQuality};
use venue_sync::store::{InMemoryStore, Snapshot};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("VENUE_SYNC_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    venue_sync::observability::init(metrics_port);

    let snapshot_path = std::env::var("VENUE_SYNC_SNAPSHOT")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .ok_or("usage: venue-sync <snapshot.json> (or set VENUE_SYNC_SNAPSHOT)")?;
    let refresh_secs: u64 = std::env::var("VENUE_SYNC_REFRESH_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let snapshot = Snapshot::from_path(&PathBuf::from(&snapshot_path))?;
    info!(
        "loaded {snapshot_path}: {} room reservations, {} event reservations",
        snapshot.room_reservations.len(),
        snapshot.event_reservations.len()
    );
    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let config = ReconcileConfig::from_env();
    info!("  failure_threshold: {}", config.failure_threshold);
    info!("  fetch_timeout: {}ms", config.fetch_timeout.as_millis());
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    let reconciler = Reconciler::new(store, config);
    let filter = ReservationFilter::default();

    // One-shot: print the view and exit.
    if refresh_secs == 0 {
        let view = reconciler.reconciled_view(&filter).await?;
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(refresh_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match reconciler.reconciled_view(&filter).await {
                    Ok(view) => log_summary(&view),
                    Err(e) => error!("reconciliation failed: {e}"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("venue-sync stopped");
    Ok(())
}

fn log_summary(view: &ReconciledView) {
    let rooms = view.rooms().count();
    let events = view.events().count();
    match &view.quality {
        ViewQuality::Complete => info!(
            "view: {} items ({rooms} rooms, {events} events), complete",
            view.count
        ),
        ViewQuality::Degraded {
            failed_fetches,
            unresolved,
        } => tracing::warn!(
            "view: {} items ({rooms} rooms, {events} events), degraded: {unresolved} unresolved, failed fetches: {failed_fetches:?}",
            view.count
        ),
    }
}
