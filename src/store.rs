use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// One kind of read issued against the collaborating stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    RoomReservations,
    EventReservations,
    Rooms,
    RoomCatalog,
    EventTypes,
    Persons,
    LinkedRoomReservations,
    LinkedEvents,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::RoomReservations => "room_reservations",
            FetchKind::EventReservations => "event_reservations",
            FetchKind::Rooms => "rooms",
            FetchKind::RoomCatalog => "room_catalog",
            FetchKind::EventTypes => "event_types",
            FetchKind::Persons => "persons",
            FetchKind::LinkedRoomReservations => "linked_room_reservations",
            FetchKind::LinkedEvents => "linked_events",
        }
    }
}

/// The collaborating store a fetch reads from. Several fetch kinds can hit
/// the same store (the rooms store serves both id batches and the catalog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    RoomReservations,
    EventReservations,
    Rooms,
    EventTypes,
    Persons,
}

impl FetchKind {
    pub fn entity(&self) -> EntityKind {
        match self {
            FetchKind::RoomReservations | FetchKind::LinkedRoomReservations => {
                EntityKind::RoomReservations
            }
            FetchKind::EventReservations | FetchKind::LinkedEvents => EntityKind::EventReservations,
            FetchKind::Rooms | FetchKind::RoomCatalog => EntityKind::Rooms,
            FetchKind::EventTypes => EntityKind::EventTypes,
            FetchKind::Persons => EntityKind::Persons,
        }
    }
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
    Timeout(FetchKind),
    NotFound(Ulid),
    Rejected(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Timeout(kind) => write!(f, "{kind} fetch timed out"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Rejected(msg) => write!(f, "rejected: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read side of the collaborating stores.
///
/// Every `*_by_ids` method must answer an empty `ids` with an empty list
/// without touching the backing store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn room_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<RoomReservation>, StoreError>;
    async fn event_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<EventReservation>, StoreError>;
    async fn rooms_by_ids(&self, ids: &[Ulid]) -> Result<Vec<Room>, StoreError>;
    /// Full room catalog. Only read when some room is referenced by label.
    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError>;
    async fn event_types_by_ids(&self, ids: &[Ulid]) -> Result<Vec<EventType>, StoreError>;
    async fn persons_by_ids(&self, ids: &[Ulid]) -> Result<Vec<Person>, StoreError>;
    async fn room_reservations_by_ids(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<RoomReservation>, StoreError>;
    async fn event_reservations_by_ids(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<EventReservation>, StoreError>;
}

/// Write side of the collaborating stores. Each call touches one record.
#[async_trait]
pub trait MutationGateway: Send + Sync {
    async fn set_assignment(
        &self,
        id: Ulid,
        kind: RecordKind,
        staff: Option<Ulid>,
    ) -> Result<(), StoreError>;
    async fn set_link(&self, room_id: Ulid, event_id: Option<Ulid>) -> Result<(), StoreError>;
    async fn delete_event(&self, id: Ulid) -> Result<(), StoreError>;
    async fn patch(&self, id: Ulid, kind: RecordKind, patch: &FieldPatch) -> Result<(), StoreError>;
}

/// Everything needed to seed an [`InMemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub persons: Vec<Person>,
    #[serde(default)]
    pub room_reservations: Vec<RoomReservation>,
    #[serde(default)]
    pub event_reservations: Vec<EventReservation>,
}

impl Snapshot {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(io::BufReader::new(file))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// A by-ids or listing call as the store saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub kind: FetchKind,
    pub ids: Vec<Ulid>,
}

/// In-memory stand-in for the collaborating stores.
///
/// Records every read it serves, and can be told to fail or slow down
/// individual fetch kinds and to reject mutations for given records.
pub struct InMemoryStore {
    rooms: DashMap<Ulid, Room>,
    event_types: DashMap<Ulid, EventType>,
    persons: DashMap<Ulid, Person>,
    room_reservations: DashMap<Ulid, RoomReservation>,
    event_reservations: DashMap<Ulid, EventReservation>,
    failing: DashSet<FetchKind>,
    latency: DashMap<FetchKind, Duration>,
    rejecting: DashSet<Ulid>,
    calls: Mutex<Vec<FetchCall>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            event_types: DashMap::new(),
            persons: DashMap::new(),
            room_reservations: DashMap::new(),
            event_reservations: DashMap::new(),
            failing: DashSet::new(),
            latency: DashMap::new(),
            rejecting: DashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for room in snapshot.rooms {
            store.insert_room(room);
        }
        for event_type in snapshot.event_types {
            store.insert_event_type(event_type);
        }
        for person in snapshot.persons {
            store.insert_person(person);
        }
        for reservation in snapshot.room_reservations {
            store.insert_room_reservation(reservation);
        }
        for reservation in snapshot.event_reservations {
            store.insert_event_reservation(reservation);
        }
        store
    }

    // ── Seeding ──────────────────────────────────────────────

    pub fn insert_room(&self, room: Room) {
        self.rooms.insert(room.id, room);
    }

    pub fn insert_event_type(&self, event_type: EventType) {
        self.event_types.insert(event_type.id, event_type);
    }

    pub fn insert_person(&self, person: Person) {
        self.persons.insert(person.id, person);
    }

    pub fn insert_room_reservation(&self, reservation: RoomReservation) {
        self.room_reservations.insert(reservation.id, reservation);
    }

    pub fn insert_event_reservation(&self, reservation: EventReservation) {
        self.event_reservations.insert(reservation.id, reservation);
    }

    pub fn remove_room_reservation(&self, id: &Ulid) -> Option<RoomReservation> {
        self.room_reservations.remove(id).map(|(_, r)| r)
    }

    pub fn room_reservation(&self, id: &Ulid) -> Option<RoomReservation> {
        self.room_reservations.get(id).map(|e| e.value().clone())
    }

    pub fn event_reservation(&self, id: &Ulid) -> Option<EventReservation> {
        self.event_reservations.get(id).map(|e| e.value().clone())
    }

    // ── Fault injection ──────────────────────────────────────

    pub fn fail(&self, kind: FetchKind) {
        self.failing.insert(kind);
    }

    pub fn recover(&self, kind: FetchKind) {
        self.failing.remove(&kind);
    }

    pub fn set_latency(&self, kind: FetchKind, latency: Duration) {
        self.latency.insert(kind, latency);
    }

    /// Make every mutation addressed to `id` fail.
    pub fn reject_mutations_for(&self, id: Ulid) {
        self.rejecting.insert(id);
    }

    // ── Call log ─────────────────────────────────────────────

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, kind: FetchKind) -> Vec<FetchCall> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Record the call, then apply any injected latency or failure.
    async fn serve(&self, kind: FetchKind, ids: &[Ulid]) -> Result<(), StoreError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FetchCall { kind, ids: ids.to_vec() });
        let latency = self.latency.get(&kind).map(|e| *e.value());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(&kind) {
            return Err(StoreError::Unavailable(format!("{kind} store offline")));
        }
        Ok(())
    }

    fn check_writable(&self, id: Ulid) -> Result<(), StoreError> {
        if self.rejecting.contains(&id) {
            return Err(StoreError::Rejected(format!("write to {id} refused")));
        }
        Ok(())
    }

    /// Drop `room_id` from whichever events list it as linked.
    fn detach_from_events(&self, room_id: Ulid) {
        for mut event in self.event_reservations.iter_mut() {
            event
                .linked_rooms
                .retain(|link| link.room_reservation_ref.id() != Some(room_id));
        }
    }
}

fn by_ids<T: Clone>(map: &DashMap<Ulid, T>, ids: &[Ulid]) -> Vec<T> {
    let unique: BTreeSet<&Ulid> = ids.iter().collect();
    unique
        .into_iter()
        .filter_map(|id| map.get(id).map(|e| e.value().clone()))
        .collect()
}

fn sorted_values<T: Clone>(map: &DashMap<Ulid, T>, keep: impl Fn(&T) -> bool) -> Vec<(Ulid, T)> {
    let mut values: Vec<(Ulid, T)> = map
        .iter()
        .filter(|e| keep(e.value()))
        .map(|e| (*e.key(), e.value().clone()))
        .collect();
    values.sort_by_key(|(id, _)| *id);
    values
}

#[async_trait]
impl Store for InMemoryStore {
    async fn room_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<RoomReservation>, StoreError> {
        self.serve(FetchKind::RoomReservations, &[]).await?;
        Ok(sorted_values(&self.room_reservations, |r| filter.matches_room(r))
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    async fn event_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<EventReservation>, StoreError> {
        self.serve(FetchKind::EventReservations, &[]).await?;
        Ok(sorted_values(&self.event_reservations, |e| filter.matches_event(e))
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }

    async fn rooms_by_ids(&self, ids: &[Ulid]) -> Result<Vec<Room>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.serve(FetchKind::Rooms, ids).await?;
        Ok(by_ids(&self.rooms, ids))
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.serve(FetchKind::RoomCatalog, &[]).await?;
        Ok(sorted_values(&self.rooms, |_| true).into_iter().map(|(_, r)| r).collect())
    }

    async fn event_types_by_ids(&self, ids: &[Ulid]) -> Result<Vec<EventType>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.serve(FetchKind::EventTypes, ids).await?;
        Ok(by_ids(&self.event_types, ids))
    }

    async fn persons_by_ids(&self, ids: &[Ulid]) -> Result<Vec<Person>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.serve(FetchKind::Persons, ids).await?;
        Ok(by_ids(&self.persons, ids))
    }

    async fn room_reservations_by_ids(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<RoomReservation>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.serve(FetchKind::LinkedRoomReservations, ids).await?;
        Ok(by_ids(&self.room_reservations, ids))
    }

    async fn event_reservations_by_ids(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<EventReservation>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.serve(FetchKind::LinkedEvents, ids).await?;
        Ok(by_ids(&self.event_reservations, ids))
    }
}

#[async_trait]
impl MutationGateway for InMemoryStore {
    async fn set_assignment(
        &self,
        id: Ulid,
        kind: RecordKind,
        staff: Option<Ulid>,
    ) -> Result<(), StoreError> {
        self.check_writable(id)?;
        match kind {
            RecordKind::Room => {
                let mut room = self.room_reservations.get_mut(&id).ok_or(StoreError::NotFound(id))?;
                room.staff_ref = Reference::from(staff);
            }
            RecordKind::Event => {
                let mut event = self
                    .event_reservations
                    .get_mut(&id)
                    .ok_or(StoreError::NotFound(id))?;
                event.staff_ref = Reference::from(staff);
            }
        }
        Ok(())
    }

    async fn set_link(&self, room_id: Ulid, event_id: Option<Ulid>) -> Result<(), StoreError> {
        self.check_writable(room_id)?;
        if !self.room_reservations.contains_key(&room_id) {
            return Err(StoreError::NotFound(room_id));
        }
        if let Some(eid) = event_id
            && !self.event_reservations.contains_key(&eid)
        {
            return Err(StoreError::NotFound(eid));
        }

        // Never hold a room entry while walking the events map.
        self.detach_from_events(room_id);
        if let Some(eid) = event_id
            && let Some(mut event) = self.event_reservations.get_mut(&eid)
        {
            event.linked_rooms.push(LinkedRoom::new(room_id));
        }

        let mut room = self
            .room_reservations
            .get_mut(&room_id)
            .ok_or(StoreError::NotFound(room_id))?;
        room.event_ref = Reference::from(event_id);
        if event_id.is_none() {
            room.status = ReservationStatus::BASELINE;
            room.staff_ref = Reference::Absent;
        }
        Ok(())
    }

    async fn delete_event(&self, id: Ulid) -> Result<(), StoreError> {
        self.check_writable(id)?;
        self.event_reservations
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn patch(
        &self,
        id: Ulid,
        kind: RecordKind,
        patch: &FieldPatch,
    ) -> Result<(), StoreError> {
        self.check_writable(id)?;
        match kind {
            RecordKind::Room => {
                let mut room = self.room_reservations.get_mut(&id).ok_or(StoreError::NotFound(id))?;
                patch.apply_to_room(&mut room);
            }
            RecordKind::Event => {
                let mut event = self
                    .event_reservations
                    .get_mut(&id)
                    .ok_or(StoreError::NotFound(id))?;
                patch.apply_to_event(&mut event);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(label: &str) -> Room {
        Room {
            id: Ulid::new(),
            label: label.into(),
            name: format!("Room {label}"),
            category: "double".into(),
        }
    }

    #[tokio::test]
    async fn empty_ids_issue_no_request() {
        let store = InMemoryStore::new();
        assert!(store.rooms_by_ids(&[]).await.unwrap().is_empty());
        assert!(store.persons_by_ids(&[]).await.unwrap().is_empty());
        assert!(store.event_types_by_ids(&[]).await.unwrap().is_empty());
        assert!(store.room_reservations_by_ids(&[]).await.unwrap().is_empty());
        assert!(store.event_reservations_by_ids(&[]).await.unwrap().is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn by_ids_skips_unknown_and_duplicates() {
        let store = InMemoryStore::new();
        let a = room("A");
        store.insert_room(a.clone());
        let found = store.rooms_by_ids(&[a.id, a.id, Ulid::new()]).await.unwrap();
        assert_eq!(found, vec![a]);
        assert_eq!(store.calls_for(FetchKind::Rooms).len(), 1);
    }

    #[tokio::test]
    async fn failing_kind_reports_unavailable() {
        let store = InMemoryStore::new();
        store.fail(FetchKind::Persons);
        let result = store.persons_by_ids(&[Ulid::new()]).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        store.recover(FetchKind::Persons);
        tokio_test::assert_ok!(store.persons_by_ids(&[Ulid::new()]).await);
    }

    #[tokio::test]
    async fn set_link_maintains_both_sides() {
        let store = InMemoryStore::new();
        let event = EventReservation::new(Ulid::new());
        let mut reservation = RoomReservation::new(Ulid::new());
        reservation.status = ReservationStatus::Confirmed;
        reservation.staff_ref = Reference::from(Ulid::new());
        store.insert_event_reservation(event.clone());
        store.insert_room_reservation(reservation.clone());

        store.set_link(reservation.id, Some(event.id)).await.unwrap();
        let linked = store.event_reservation(&event.id).unwrap();
        assert_eq!(linked.linked_rooms, vec![LinkedRoom::new(reservation.id)]);
        assert_eq!(store.room_reservation(&reservation.id).unwrap().event_ref.id(), Some(event.id));

        store.set_link(reservation.id, None).await.unwrap();
        assert!(store.event_reservation(&event.id).unwrap().linked_rooms.is_empty());
        let unlinked = store.room_reservation(&reservation.id).unwrap();
        assert_eq!(unlinked.event_ref, Reference::Absent);
        assert_eq!(unlinked.status, ReservationStatus::BASELINE);
        assert_eq!(unlinked.staff_ref, Reference::Absent);
    }

    #[tokio::test]
    async fn rejected_mutation_leaves_record_alone() {
        let store = InMemoryStore::new();
        let event = EventReservation::new(Ulid::new());
        store.insert_event_reservation(event.clone());
        store.reject_mutations_for(event.id);

        let result = store.set_assignment(event.id, RecordKind::Event, Some(Ulid::new())).await;
        tokio_test::assert_err!(result);
        assert_eq!(store.event_reservation(&event.id).unwrap().staff_ref, Reference::Absent);
    }

    #[tokio::test]
    async fn filter_applies_to_primary_reads() {
        let store = InMemoryStore::new();
        let mut confirmed = RoomReservation::new(Ulid::new());
        confirmed.status = ReservationStatus::Confirmed;
        store.insert_room_reservation(confirmed.clone());
        store.insert_room_reservation(RoomReservation::new(Ulid::new()));

        let filter = ReservationFilter {
            statuses: vec![ReservationStatus::Confirmed],
            ..Default::default()
        };
        let rooms = store.room_reservations(&filter).await.unwrap();
        assert_eq!(rooms, vec![confirmed]);
    }

    #[test]
    fn snapshot_loads_from_json() {
        let r = room("C");
        let json = serde_json::json!({ "rooms": [r] });
        let snapshot: Snapshot = serde_json::from_value(json).unwrap();
        let store = InMemoryStore::from_snapshot(snapshot);
        assert!(store.rooms.contains_key(&r.id));
        assert!(store.event_reservations.is_empty());
    }
}
