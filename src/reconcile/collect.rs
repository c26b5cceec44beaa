use std::collections::BTreeSet;

use ulid::Ulid;

use crate::model::*;

/// Deduplicated id sets extracted from one batch of raw records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedRefs {
    pub rooms: BTreeSet<Ulid>,
    /// Room references that are labels rather than identifiers.
    pub room_labels: BTreeSet<String>,
    pub event_types: BTreeSet<Ulid>,
    /// Owners and staff from both collections.
    pub persons: BTreeSet<Ulid>,
    /// Events referenced from room records and not already in hand.
    pub linked_events: BTreeSet<Ulid>,
    /// Room reservations referenced from event records and not already in hand.
    pub linked_room_reservations: BTreeSet<Ulid>,
}

impl CollectedRefs {
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
            && self.room_labels.is_empty()
            && self.event_types.is_empty()
            && self.persons.is_empty()
            && self.linked_events.is_empty()
            && self.linked_room_reservations.is_empty()
    }
}

/// Scan both record sets and collect every identifier-shaped reference.
///
/// Labels and absent values never enter an id set; only room labels are kept
/// aside so the resolver knows label matching will be needed.
pub fn collect(rooms: &[RoomReservation], events: &[EventReservation]) -> CollectedRefs {
    let mut refs = CollectedRefs::default();

    let rooms_in_hand: BTreeSet<Ulid> = rooms.iter().map(|r| r.id).collect();
    let events_in_hand: BTreeSet<Ulid> = events.iter().map(|e| e.id).collect();

    for room in rooms {
        add_room_ref(&room.room_ref, &mut refs.rooms, &mut refs.room_labels);
        add_id(&room.owner_ref, &mut refs.persons);
        add_id(&room.staff_ref, &mut refs.persons);
        if let Some(event_id) = room.event_ref.id()
            && !events_in_hand.contains(&event_id)
        {
            refs.linked_events.insert(event_id);
        }
    }

    for event in events {
        add_id(&event.event_type_ref, &mut refs.event_types);
        add_id(&event.owner_ref, &mut refs.persons);
        add_id(&event.staff_ref, &mut refs.persons);
        for link in &event.linked_rooms {
            if let Some(rr_id) = link.room_reservation_ref.id()
                && !rooms_in_hand.contains(&rr_id)
            {
                refs.linked_room_reservations.insert(rr_id);
            }
        }
    }

    refs
}

/// Room references carried by room reservations fetched through events,
/// minus the ids a previous pass already asked for.
pub fn collect_transitive_rooms<'a>(
    fetched: impl IntoIterator<Item = &'a RoomReservation>,
    already_requested: &BTreeSet<Ulid>,
) -> (BTreeSet<Ulid>, BTreeSet<String>) {
    let mut ids = BTreeSet::new();
    let mut labels = BTreeSet::new();
    for reservation in fetched {
        add_room_ref(&reservation.room_ref, &mut ids, &mut labels);
    }
    ids.retain(|id| !already_requested.contains(id));
    (ids, labels)
}

fn add_id(reference: &Reference, set: &mut BTreeSet<Ulid>) {
    if let Some(id) = reference.id() {
        set.insert(id);
    }
}

fn add_room_ref(reference: &Reference, ids: &mut BTreeSet<Ulid>, labels: &mut BTreeSet<String>) {
    match reference {
        Reference::Identifier(id) => {
            ids.insert(*id);
        }
        Reference::Label(label) => {
            labels.insert(label.trim().to_lowercase());
        }
        Reference::Absent => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_reservation(room_ref: Reference) -> RoomReservation {
        RoomReservation {
            room_ref,
            ..RoomReservation::new(Ulid::new())
        }
    }

    #[test]
    fn duplicate_room_ids_collected_once() {
        let a = Ulid::new();
        let b = Ulid::new();
        let rooms: Vec<_> = [a, b, a, a, b]
            .into_iter()
            .map(|id| room_reservation(Reference::from(id)))
            .collect();
        let refs = collect(&rooms, &[]);
        assert_eq!(refs.rooms, BTreeSet::from([a, b]));
        assert!(refs.room_labels.is_empty());
    }

    #[test]
    fn labels_and_absent_values_stay_out_of_id_sets() {
        let rooms = vec![
            room_reservation(Reference::Label("C".into())),
            room_reservation(Reference::Label(" c ".into())),
            room_reservation(Reference::Absent),
        ];
        let refs = collect(&rooms, &[]);
        assert!(refs.rooms.is_empty());
        assert_eq!(refs.room_labels, BTreeSet::from(["c".to_string()]));
    }

    #[test]
    fn owners_and_staff_merge_into_one_person_set() {
        let shared = Ulid::new();
        let staff = Ulid::new();
        let mut room = RoomReservation::new(Ulid::new());
        room.owner_ref = Reference::from(shared);
        room.staff_ref = Reference::from(staff);
        let mut event = EventReservation::new(Ulid::new());
        event.owner_ref = Reference::from(shared);
        event.staff_ref = Reference::Label("bob".into());

        let refs = collect(&[room], &[event]);
        assert_eq!(refs.persons, BTreeSet::from([shared, staff]));
    }

    #[test]
    fn linked_records_in_hand_are_not_requested() {
        let present_room = RoomReservation::new(Ulid::new());
        let missing_rr = Ulid::new();
        let mut event = EventReservation::new(Ulid::new());
        event.linked_rooms = vec![LinkedRoom::new(present_room.id), LinkedRoom::new(missing_rr)];

        let mut linked_room = present_room.clone();
        linked_room.event_ref = Reference::from(event.id);
        let mut orphan = RoomReservation::new(Ulid::new());
        let outside_event = Ulid::new();
        orphan.event_ref = Reference::from(outside_event);

        let refs = collect(&[linked_room, orphan], &[event]);
        assert_eq!(refs.linked_room_reservations, BTreeSet::from([missing_rr]));
        assert_eq!(refs.linked_events, BTreeSet::from([outside_event]));
    }

    #[test]
    fn transitive_rooms_skip_already_requested() {
        let known = Ulid::new();
        let fresh = Ulid::new();
        let fetched = vec![
            room_reservation(Reference::from(known)),
            room_reservation(Reference::from(fresh)),
            room_reservation(Reference::Label("B".into())),
        ];
        let (ids, labels) = collect_transitive_rooms(&fetched, &BTreeSet::from([known]));
        assert_eq!(ids, BTreeSet::from([fresh]));
        assert_eq!(labels, BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn empty_input_collects_nothing() {
        assert!(collect(&[], &[]).is_empty());
    }
}
