use std::net::SocketAddr;

use crate::model::FieldPatch;

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: reconciliation passes. Labels: status (complete, degraded, unavailable).
pub const PASSES_TOTAL: &str = "venue_sync_passes_total";

/// Histogram: reconciliation pass latency in seconds.
pub const PASS_DURATION_SECONDS: &str = "venue_sync_pass_duration_seconds";

/// Counter: batch or primary fetches that failed or timed out. Labels: kind.
pub const FETCH_FAILURES_TOTAL: &str = "venue_sync_fetch_failures_total";

/// Counter: present references that resolved to a placeholder.
pub const PLACEHOLDERS_TOTAL: &str = "venue_sync_placeholders_total";

// ── Synchronizer ────────────────────────────────────────────────

/// Counter: synchronizer operations. Labels: op, status.
pub const SYNC_OPS_TOTAL: &str = "venue_sync_sync_ops_total";

/// Counter: operations rolled back to the pre-mutation snapshot. Labels: reason.
pub const SYNC_ROLLBACKS_TOTAL: &str = "venue_sync_sync_rollbacks_total";

/// Counter: background refetches. Labels: status (applied, stale, failed).
pub const RESYNCS_TOTAL: &str = "venue_sync_resyncs_total";

/// Gauge: records held in the synchronizer cache.
pub const CACHE_RECORDS: &str = "venue_sync_cache_records";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a patch to a short label for metrics.
pub fn patch_label(patch: &FieldPatch) -> &'static str {
    match patch {
        FieldPatch::Price(_) => "patch_price",
        FieldPatch::Notes(_) => "patch_notes",
        FieldPatch::ContactName { .. } => "patch_contact_name",
        FieldPatch::Status(_) => "patch_status",
        FieldPatch::Staff(_) => "patch_staff",
    }
}
