mod assemble;
mod collect;
mod error;
mod join;
mod resolve;

pub use assemble::{assemble, ReconciledView, ViewQuality};
pub use collect::{collect, collect_transitive_rooms, CollectedRefs};
pub use error::ReconcileError;
pub use join::{
    event_by_id, event_type_by_id, first_match, person_by_id, resolve_event, resolve_linked_room,
    resolve_room, room_by_id, room_by_label, room_reservation_by_id, JoinStats, Lookup,
};
pub use resolve::{resolve_batches, LookupTables, Resolution};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::ReconcileConfig;
use crate::model::*;
use crate::store::{FetchKind, Store};

use resolve::timed;

/// Runs reconciliation passes against the collaborating stores.
///
/// Holds no state between passes: every call collects, fetches, joins and
/// assembles from scratch.
pub struct Reconciler {
    store: Arc<dyn Store>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, config: ReconcileConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Read both reservation collections and reconcile them.
    pub async fn reconciled_view(
        &self,
        filter: &ReservationFilter,
    ) -> Result<ReconciledView, ReconcileError> {
        let timeout = self.config.fetch_timeout;
        let (rooms, events) = tokio::join!(
            timed(FetchKind::RoomReservations, timeout, self.store.room_reservations(filter)),
            timed(FetchKind::EventReservations, timeout, self.store.event_reservations(filter)),
        );
        let rooms = rooms.map_err(|error| self.source_failed(FetchKind::RoomReservations, error))?;
        let events =
            events.map_err(|error| self.source_failed(FetchKind::EventReservations, error))?;
        self.reconcile(&rooms, &events).await
    }

    /// Reconcile records the caller already holds.
    pub async fn reconcile(
        &self,
        rooms: &[RoomReservation],
        events: &[EventReservation],
    ) -> Result<ReconciledView, ReconcileError> {
        let started = Instant::now();
        let refs = collect(rooms, events);
        debug!(
            rooms = refs.rooms.len(),
            labels = refs.room_labels.len(),
            event_types = refs.event_types.len(),
            persons = refs.persons.len(),
            linked_events = refs.linked_events.len(),
            linked_room_reservations = refs.linked_room_reservations.len(),
            "collected references"
        );

        let resolved =
            resolve_batches(self.store.as_ref(), &refs, rooms, events, &self.config).await;
        let resolution = match resolved {
            Ok(resolution) => resolution,
            Err(e) => {
                error!("{e}");
                metrics::counter!(crate::observability::PASSES_TOTAL, "status" => "unavailable")
                    .increment(1);
                return Err(e);
            }
        };

        let mut stats = JoinStats::new(self.config.warn_on_missing);
        let resolved_rooms: Vec<_> = rooms
            .iter()
            .map(|room| resolve_room(room, &resolution.tables, &mut stats))
            .collect();
        let resolved_events: Vec<_> = events
            .iter()
            .map(|event| resolve_event(event, &resolution.tables, &mut stats))
            .collect();

        let failed = resolution.failed.into_iter().collect();
        let quality = ViewQuality::from_outcome(failed, stats.unresolved);
        let view = ReconciledView::new(assemble(resolved_rooms, resolved_events), quality);

        let status = if view.quality.is_complete() { "complete" } else { "degraded" };
        metrics::counter!(crate::observability::PASSES_TOTAL, "status" => status).increment(1);
        metrics::counter!(crate::observability::PLACEHOLDERS_TOTAL)
            .increment(stats.unresolved as u64);
        metrics::histogram!(crate::observability::PASS_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            items = view.count,
            unresolved = stats.unresolved,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciliation pass finished"
        );
        Ok(view)
    }

    fn source_failed(&self, kind: FetchKind, error: crate::store::StoreError) -> ReconcileError {
        error!(kind = kind.as_str(), %error, "primary read failed");
        metrics::counter!(crate::observability::FETCH_FAILURES_TOTAL, "kind" => kind.as_str())
            .increment(1);
        metrics::counter!(crate::observability::PASSES_TOTAL, "status" => "unavailable")
            .increment(1);
        ReconcileError::SourceFailed { kind, error }
    }
}
