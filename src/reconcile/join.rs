use tracing::warn;
use ulid::Ulid;

use crate::model::*;

use super::resolve::LookupTables;

/// One step of a fallback chain: find the record a reference points at.
pub type Lookup<'t, T> = fn(&Reference, &'t LookupTables) -> Option<&'t T>;

/// Try each step in order and return the first hit.
pub fn first_match<'t, T>(
    reference: &Reference,
    tables: &'t LookupTables,
    chain: &[Lookup<'t, T>],
) -> Option<&'t T> {
    chain.iter().find_map(|step| step(reference, tables))
}

// ── Strategies ───────────────────────────────────────────────────

pub fn room_by_id<'t>(reference: &Reference, tables: &'t LookupTables) -> Option<&'t Room> {
    reference.id().and_then(|id| tables.rooms.get(&id))
}

/// Case-insensitive exact match on the room label. Rooms are scanned in id
/// order, so the lowest id wins when two rooms share a label.
pub fn room_by_label<'t>(reference: &Reference, tables: &'t LookupTables) -> Option<&'t Room> {
    let wanted = reference.label()?.trim().to_lowercase();
    tables
        .rooms
        .values()
        .find(|room| room.label.trim().to_lowercase() == wanted)
}

pub fn event_type_by_id<'t>(
    reference: &Reference,
    tables: &'t LookupTables,
) -> Option<&'t EventType> {
    reference.id().and_then(|id| tables.event_types.get(&id))
}

pub fn person_by_id<'t>(reference: &Reference, tables: &'t LookupTables) -> Option<&'t Person> {
    reference.id().and_then(|id| tables.persons.get(&id))
}

pub fn event_by_id<'t>(
    reference: &Reference,
    tables: &'t LookupTables,
) -> Option<&'t EventReservation> {
    reference.id().and_then(|id| tables.events.get(&id))
}

pub fn room_reservation_by_id<'t>(
    reference: &Reference,
    tables: &'t LookupTables,
) -> Option<&'t RoomReservation> {
    reference.id().and_then(|id| tables.room_reservations.get(&id))
}

fn room_chain<'t>() -> [Lookup<'t, Room>; 2] {
    [room_by_id as Lookup<'t, Room>, room_by_label as Lookup<'t, Room>]
}

fn event_type_chain<'t>() -> [Lookup<'t, EventType>; 1] {
    [event_type_by_id as Lookup<'t, EventType>]
}

fn person_chain<'t>() -> [Lookup<'t, Person>; 1] {
    [person_by_id as Lookup<'t, Person>]
}

fn event_chain<'t>() -> [Lookup<'t, EventReservation>; 1] {
    [event_by_id as Lookup<'t, EventReservation>]
}

fn room_reservation_chain<'t>() -> [Lookup<'t, RoomReservation>; 1] {
    [room_reservation_by_id as Lookup<'t, RoomReservation>]
}

// ── Joiner ───────────────────────────────────────────────────────

/// Counts references that were present but could not be resolved.
#[derive(Debug, Clone, Default)]
pub struct JoinStats {
    pub unresolved: usize,
    warn_on_missing: bool,
}

impl JoinStats {
    pub fn new(warn_on_missing: bool) -> Self {
        Self {
            unresolved: 0,
            warn_on_missing,
        }
    }

    fn missing(&mut self, record: Ulid, field: &'static str, reference: &Reference) {
        if !reference.is_present() {
            return;
        }
        self.unresolved += 1;
        if self.warn_on_missing {
            warn!(%record, field, reference = ?reference, "reference not found, using placeholder");
        }
    }
}

fn room_details(
    record: Ulid,
    field: &'static str,
    reference: &Reference,
    tables: &LookupTables,
    stats: &mut JoinStats,
) -> RoomDetails {
    match first_match(reference, tables, &room_chain()) {
        Some(room) => RoomDetails::from(room),
        None => {
            stats.missing(record, field, reference);
            RoomDetails::placeholder()
        }
    }
}

fn person_details(
    record: Ulid,
    field: &'static str,
    reference: &Reference,
    tables: &LookupTables,
    stats: &mut JoinStats,
) -> PersonDetails {
    match first_match(reference, tables, &person_chain()) {
        Some(person) => PersonDetails::from(person),
        None => {
            stats.missing(record, field, reference);
            PersonDetails::placeholder()
        }
    }
}

/// Resolve every reference on a room reservation.
pub fn resolve_room(
    raw: &RoomReservation,
    tables: &LookupTables,
    stats: &mut JoinStats,
) -> ResolvedRoomReservation {
    let event_details = match first_match(&raw.event_ref, tables, &event_chain()) {
        Some(event) => EventLinkDetails::from(event),
        None => {
            stats.missing(raw.id, "event_ref", &raw.event_ref);
            EventLinkDetails::placeholder()
        }
    };
    ResolvedRoomReservation {
        room_details: room_details(raw.id, "room_ref", &raw.room_ref, tables, stats),
        event_details,
        owner_details: person_details(raw.id, "owner_ref", &raw.owner_ref, tables, stats),
        staff_details: person_details(raw.id, "staff_ref", &raw.staff_ref, tables, stats),
        raw: raw.clone(),
    }
}

/// Resolve one entry of an event's `linked_rooms`.
///
/// The label comes from the reservation's own snapshot; only when that is
/// blank is the room one hop away consulted.
pub fn resolve_linked_room(
    event: Ulid,
    link: &LinkedRoom,
    tables: &LookupTables,
    stats: &mut JoinStats,
) -> ResolvedLinkedRoom {
    let chain = room_reservation_chain();
    let Some(reservation) = first_match(&link.room_reservation_ref, tables, &chain) else {
        stats.missing(event, "linked_rooms.room_reservation_ref", &link.room_reservation_ref);
        return ResolvedLinkedRoom {
            room_reservation_ref: link.room_reservation_ref.clone(),
            label: UNKNOWN_LABEL.to_string(),
            room_reservation_details: RoomReservationDetails::placeholder(),
        };
    };
    let label = reservation
        .room_label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .or_else(|| {
            first_match(&reservation.room_ref, tables, &room_chain()).map(|room| room.label.clone())
        })
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
    ResolvedLinkedRoom {
        room_reservation_ref: link.room_reservation_ref.clone(),
        room_reservation_details: RoomReservationDetails::from_reservation(
            reservation,
            label.clone(),
        ),
        label,
    }
}

/// Resolve every reference on an event reservation.
pub fn resolve_event(
    raw: &EventReservation,
    tables: &LookupTables,
    stats: &mut JoinStats,
) -> ResolvedEventReservation {
    let event_type_details = match first_match(&raw.event_type_ref, tables, &event_type_chain()) {
        Some(event_type) => EventTypeDetails::from(event_type),
        None => {
            stats.missing(raw.id, "event_type_ref", &raw.event_type_ref);
            EventTypeDetails::placeholder()
        }
    };
    let linked_room_details: Vec<ResolvedLinkedRoom> = raw
        .linked_rooms
        .iter()
        .map(|link| resolve_linked_room(raw.id, link, tables, stats))
        .collect();
    ResolvedEventReservation {
        event_type_details,
        linked_room_count: linked_room_details.len(),
        linked_room_details,
        owner_details: person_details(raw.id, "owner_ref", &raw.owner_ref, tables, stats),
        staff_details: person_details(raw.id, "staff_ref", &raw.staff_ref, tables, stats),
        raw: raw.clone(),
    }
}
