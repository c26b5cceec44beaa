use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;
use crate::reconcile::{assemble, ReconciledView};

use super::SyncError;

/// Client-held copy of the resolved collection.
///
/// Pure state: every transition mutates in place and returns the ids it
/// touched. Remote writes, locking and rollback live in the synchronizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncCache {
    pub(super) rooms: BTreeMap<Ulid, ResolvedRoomReservation>,
    pub(super) events: BTreeMap<Ulid, ResolvedEventReservation>,
}

impl SyncCache {
    /// Build a cache from a reconciled view.
    ///
    /// Counters are recomputed from the rooms actually present and linked
    /// rooms take their event's staff, so a freshly loaded cache always
    /// satisfies [`SyncCache::check_invariants`].
    pub fn from_view(view: &ReconciledView) -> Self {
        let mut cache = Self::default();
        for item in &view.items {
            match item {
                ViewItem::Room(room) => {
                    cache.rooms.insert(room.raw.id, room.clone());
                }
                ViewItem::Event(event) => {
                    cache.events.insert(event.raw.id, event.clone());
                }
            }
        }

        let event_ids: Vec<Ulid> = cache.events.keys().copied().collect();
        for event_id in event_ids {
            let linked = cache.linked_rooms_of(event_id);
            let Some(event) = cache.events.get_mut(&event_id) else { continue };
            event.linked_room_count = linked.len();
            let staff_ref = event.raw.staff_ref.clone();
            let staff_details = event.staff_details.clone();
            for room_id in linked {
                if let Some(room) = cache.rooms.get_mut(&room_id) {
                    room.raw.staff_ref = staff_ref.clone();
                    room.staff_details = staff_details.clone();
                }
            }
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.rooms.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty() && self.events.is_empty()
    }

    pub fn room(&self, id: &Ulid) -> Option<&ResolvedRoomReservation> {
        self.rooms.get(id)
    }

    pub fn event(&self, id: &Ulid) -> Option<&ResolvedEventReservation> {
        self.events.get(id)
    }

    pub fn kind_of(&self, id: &Ulid) -> Option<RecordKind> {
        if self.rooms.contains_key(id) {
            Some(RecordKind::Room)
        } else if self.events.contains_key(id) {
            Some(RecordKind::Event)
        } else {
            None
        }
    }

    /// Fail unless `id` is cached as a record of `kind`.
    pub fn expect_kind(&self, id: Ulid, kind: RecordKind) -> Result<(), SyncError> {
        match self.kind_of(&id) {
            None => Err(SyncError::NotFound(id)),
            Some(found) if found != kind => Err(SyncError::KindMismatch {
                id,
                expected: kind,
                found,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Rooms whose `event_ref` points at `event_id`, by scanning the cache.
    pub fn linked_rooms_of(&self, event_id: Ulid) -> Vec<Ulid> {
        self.rooms
            .values()
            .filter(|room| room.event_id() == Some(event_id))
            .map(|room| room.raw.id)
            .collect()
    }

    /// The current view as one ordered list.
    pub fn items(&self) -> Vec<ViewItem> {
        assemble(
            self.rooms.values().cloned().collect(),
            self.events.values().cloned().collect(),
        )
    }

    /// Details for a person seen anywhere in the cache, or a placeholder.
    pub fn person_details(&self, id: Option<Ulid>) -> PersonDetails {
        let Some(id) = id else {
            return PersonDetails::placeholder();
        };
        let rooms = self
            .rooms
            .values()
            .flat_map(|r| [&r.owner_details, &r.staff_details]);
        let events = self
            .events
            .values()
            .flat_map(|e| [&e.owner_details, &e.staff_details]);
        rooms
            .chain(events)
            .find(|details| details.id == Some(id))
            .cloned()
            .unwrap_or_else(PersonDetails::placeholder)
    }

    /// Every event's counter matches a scan of the cache, and every linked
    /// room carries its event's staff. Rooms linked to an event that is not
    /// cached are outside the cache's knowledge and are skipped.
    pub fn check_invariants(&self) -> Result<(), SyncError> {
        for event in self.events.values() {
            let scanned = self.linked_rooms_of(event.raw.id);
            if scanned.len() != event.linked_room_count {
                return Err(SyncError::InvariantViolation(format!(
                    "event {} counts {} linked rooms but {} are cached",
                    event.raw.id,
                    event.linked_room_count,
                    scanned.len()
                )));
            }
        }
        for room in self.rooms.values() {
            let Some(event) = room.event_id().and_then(|id| self.events.get(&id)) else {
                continue;
            };
            if room.raw.staff_ref != event.raw.staff_ref {
                return Err(SyncError::InvariantViolation(format!(
                    "room {} staff differs from its event {}",
                    room.raw.id, event.raw.id
                )));
            }
        }
        Ok(())
    }

    // ── Transitions ──────────────────────────────────────────

    /// Whether the event and all its linked rooms already carry `staff`.
    pub fn event_staffed_with(&self, event_id: Ulid, staff: Option<Ulid>) -> bool {
        let wanted = Reference::from(staff);
        self.events.get(&event_id).is_some_and(|e| e.raw.staff_ref == wanted)
            && self
                .linked_rooms_of(event_id)
                .iter()
                .all(|id| self.rooms.get(id).is_some_and(|r| r.raw.staff_ref == wanted))
    }

    /// Set staff on an event and every room linked to it. Returns the rooms.
    pub fn set_event_staff(&mut self, event_id: Ulid, staff: Option<Ulid>) -> Vec<Ulid> {
        let details = self.person_details(staff);
        let linked = self.linked_rooms_of(event_id);
        if let Some(event) = self.events.get_mut(&event_id) {
            event.raw.staff_ref = Reference::from(staff);
            event.staff_details = details.clone();
        }
        for id in &linked {
            if let Some(room) = self.rooms.get_mut(id) {
                room.raw.staff_ref = Reference::from(staff);
                room.staff_details = details.clone();
            }
        }
        linked
    }

    pub fn set_room_staff(&mut self, room_id: Ulid, staff: Option<Ulid>) {
        let details = self.person_details(staff);
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.raw.staff_ref = Reference::from(staff);
            room.staff_details = details;
        }
    }

    pub fn event_has_status(&self, event_id: Ulid, status: ReservationStatus) -> bool {
        self.events.get(&event_id).is_some_and(|e| e.raw.status == status)
            && self
                .linked_rooms_of(event_id)
                .iter()
                .all(|id| self.rooms.get(id).is_some_and(|r| r.raw.status == status))
    }

    /// Set status on an event and every room linked to it. Returns the rooms.
    pub fn set_event_status(&mut self, event_id: Ulid, status: ReservationStatus) -> Vec<Ulid> {
        let linked = self.linked_rooms_of(event_id);
        if let Some(event) = self.events.get_mut(&event_id) {
            event.raw.status = status;
            for link in &mut event.linked_room_details {
                if link.room_reservation_details.id.is_some_and(|id| linked.contains(&id)) {
                    link.room_reservation_details.status = status;
                }
            }
        }
        for id in &linked {
            if let Some(room) = self.rooms.get_mut(id) {
                room.raw.status = status;
                room.event_details.status = status;
            }
        }
        linked
    }

    pub fn set_room_status(&mut self, room_id: Ulid, status: ReservationStatus) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.raw.status = status;
        }
        for event in self.events.values_mut() {
            for link in &mut event.linked_room_details {
                if link.room_reservation_details.id == Some(room_id) {
                    link.room_reservation_details.status = status;
                }
            }
        }
    }

    /// Detach a room from its event: the room drops its event, its status
    /// falls back to the baseline and its inherited staff is cleared.
    pub fn unlink_room(&mut self, room_id: Ulid, event_id: Ulid) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.raw.event_ref = Reference::Absent;
            room.event_details = EventLinkDetails::placeholder();
            room.raw.status = ReservationStatus::BASELINE;
            room.raw.staff_ref = Reference::Absent;
            room.staff_details = PersonDetails::placeholder();
        }
        if let Some(event) = self.events.get_mut(&event_id) {
            event
                .raw
                .linked_rooms
                .retain(|link| link.room_reservation_ref.id() != Some(room_id));
            event
                .linked_room_details
                .retain(|link| link.room_reservation_ref.id() != Some(room_id));
            event.linked_room_count = event.linked_room_count.saturating_sub(1);
        }
    }

    pub fn remove_event(&mut self, event_id: &Ulid) -> Option<ResolvedEventReservation> {
        self.events.remove(event_id)
    }

    /// Apply a plain field patch to one record, without any cascade.
    /// Returns whether the record changed.
    pub fn patch_record(&mut self, id: Ulid, kind: RecordKind, patch: &FieldPatch) -> bool {
        match kind {
            RecordKind::Room => {
                let Some(room) = self.rooms.get_mut(&id) else { return false };
                let before = room.raw.clone();
                patch.apply_to_room(&mut room.raw);
                room.raw != before
            }
            RecordKind::Event => {
                let Some(event) = self.events.get_mut(&id) else { return false };
                let before = event.raw.clone();
                patch.apply_to_event(&mut event.raw);
                event.raw != before
            }
        }
    }
}
