use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::config::ReconcileConfig;
use crate::model::*;
use crate::store::{EntityKind, FetchKind, Store, StoreError};

use super::collect::{collect_transitive_rooms, CollectedRefs};
use super::ReconcileError;

/// Request-scoped lookup tables. Built once per pass, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    pub rooms: BTreeMap<Ulid, Room>,
    pub event_types: BTreeMap<Ulid, EventType>,
    pub persons: BTreeMap<Ulid, Person>,
    pub room_reservations: BTreeMap<Ulid, RoomReservation>,
    pub events: BTreeMap<Ulid, EventReservation>,
}

/// Lookup tables plus the fetch kinds that degraded to empty.
#[derive(Debug, Default)]
pub struct Resolution {
    pub tables: LookupTables,
    pub failed: BTreeSet<FetchKind>,
}

/// Run `fut` under the fetch deadline; running out of time is a failure.
pub(super) async fn timed<T, Fut>(
    kind: FetchKind,
    timeout: Duration,
    fut: Fut,
) -> Result<T, StoreError>
where
    Fut: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(kind)),
    }
}

/// Skip the fetch entirely when there is nothing to ask for.
async fn guarded<T, F, Fut>(
    kind: FetchKind,
    ids: &[Ulid],
    timeout: Duration,
    fetch: F,
) -> Result<Vec<T>, StoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, StoreError>>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    timed(kind, timeout, fetch()).await
}

async fn catalog_if<S: Store + ?Sized>(
    store: &S,
    wanted: bool,
    timeout: Duration,
) -> Result<Vec<Room>, StoreError> {
    if !wanted {
        return Ok(Vec::new());
    }
    timed(FetchKind::RoomCatalog, timeout, store.all_rooms()).await
}

/// Unwrap one fetch result, degrading a failure to an empty list.
fn settle<T>(
    kind: FetchKind,
    result: Result<Vec<T>, StoreError>,
    failed: &mut BTreeSet<FetchKind>,
) -> Vec<T> {
    match result {
        Ok(records) => {
            debug!(kind = kind.as_str(), fetched = records.len(), "batch fetch ok");
            records
        }
        Err(e) => {
            warn!(
                kind = kind.as_str(),
                error = %e,
                "batch fetch failed, resolving as placeholders"
            );
            metrics::counter!(crate::observability::FETCH_FAILURES_TOTAL, "kind" => kind.as_str())
                .increment(1);
            failed.insert(kind);
            Vec::new()
        }
    }
}

/// Counts failed stores, not failed fetches. The rooms store serves both the
/// id batch and the catalog.
fn check_threshold(
    failed: &BTreeSet<FetchKind>,
    config: &ReconcileConfig,
) -> Result<(), ReconcileError> {
    let entities: BTreeSet<EntityKind> = failed.iter().map(FetchKind::entity).collect();
    if entities.len() >= config.failure_threshold {
        return Err(ReconcileError::Unavailable {
            failed: failed.iter().copied().collect(),
            entities: entities.len(),
        });
    }
    Ok(())
}

/// Fetch everything the collected references point at, in two passes.
///
/// Pass 1 fans out one fetch per entity type. Pass 2 fetches the rooms used
/// by room reservations that only arrived in pass 1. The primary records are
/// folded into the tables so that links between them resolve too.
pub async fn resolve_batches<S: Store + ?Sized>(
    store: &S,
    refs: &CollectedRefs,
    primary_rooms: &[RoomReservation],
    primary_events: &[EventReservation],
    config: &ReconcileConfig,
) -> Result<Resolution, ReconcileError> {
    let timeout = config.fetch_timeout;
    let mut failed = BTreeSet::new();

    let room_ids: Vec<Ulid> = refs.rooms.iter().copied().collect();
    let event_type_ids: Vec<Ulid> = refs.event_types.iter().copied().collect();
    let person_ids: Vec<Ulid> = refs.persons.iter().copied().collect();
    let rr_ids: Vec<Ulid> = refs.linked_room_reservations.iter().copied().collect();
    let event_ids: Vec<Ulid> = refs.linked_events.iter().copied().collect();
    let wants_catalog = !refs.room_labels.is_empty();

    // ── Pass 1 ───────────────────────────────────────────────
    let (rooms, catalog, event_types, persons, linked_rrs, linked_events) = tokio::join!(
        guarded(FetchKind::Rooms, &room_ids, timeout, || store.rooms_by_ids(&room_ids)),
        catalog_if(store, wants_catalog, timeout),
        guarded(FetchKind::EventTypes, &event_type_ids, timeout, || {
            store.event_types_by_ids(&event_type_ids)
        }),
        guarded(FetchKind::Persons, &person_ids, timeout, || store.persons_by_ids(&person_ids)),
        guarded(FetchKind::LinkedRoomReservations, &rr_ids, timeout, || {
            store.room_reservations_by_ids(&rr_ids)
        }),
        guarded(FetchKind::LinkedEvents, &event_ids, timeout, || {
            store.event_reservations_by_ids(&event_ids)
        }),
    );

    let mut tables = LookupTables::default();
    for room in settle(FetchKind::Rooms, rooms, &mut failed) {
        tables.rooms.insert(room.id, room);
    }
    for room in settle(FetchKind::RoomCatalog, catalog, &mut failed) {
        tables.rooms.insert(room.id, room);
    }
    for event_type in settle(FetchKind::EventTypes, event_types, &mut failed) {
        tables.event_types.insert(event_type.id, event_type);
    }
    for person in settle(FetchKind::Persons, persons, &mut failed) {
        tables.persons.insert(person.id, person);
    }
    let linked_rrs = settle(FetchKind::LinkedRoomReservations, linked_rrs, &mut failed);
    for event in settle(FetchKind::LinkedEvents, linked_events, &mut failed) {
        tables.events.insert(event.id, event);
    }
    check_threshold(&failed, config)?;

    // ── Pass 2 ───────────────────────────────────────────────
    let (transitive_ids, transitive_labels) = collect_transitive_rooms(&linked_rrs, &refs.rooms);
    let transitive_ids: Vec<Ulid> = transitive_ids
        .into_iter()
        .filter(|id| !tables.rooms.contains_key(id))
        .collect();
    let needs_catalog = !wants_catalog && !transitive_labels.is_empty();
    if !transitive_ids.is_empty() || needs_catalog {
        debug!(
            rooms = transitive_ids.len(),
            catalog = needs_catalog,
            "second pass for rooms of linked reservations"
        );
        let (rooms, catalog) = tokio::join!(
            guarded(FetchKind::Rooms, &transitive_ids, timeout, || {
                store.rooms_by_ids(&transitive_ids)
            }),
            catalog_if(store, needs_catalog, timeout),
        );
        for room in settle(FetchKind::Rooms, rooms, &mut failed) {
            tables.rooms.insert(room.id, room);
        }
        for room in settle(FetchKind::RoomCatalog, catalog, &mut failed) {
            tables.rooms.insert(room.id, room);
        }
        check_threshold(&failed, config)?;
    }

    for reservation in linked_rrs {
        tables.room_reservations.insert(reservation.id, reservation);
    }
    for reservation in primary_rooms {
        tables.room_reservations.insert(reservation.id, reservation.clone());
    }
    for event in primary_events {
        tables.events.insert(event.id, event.clone());
    }

    Ok(Resolution { tables, failed })
}
