use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use ulid::Ulid;

use venue_sync::config::{ReconcileConfig, SyncConfig};
use venue_sync::model::*;
use venue_sync::notify::{NoticeHub, SyncNotice};
use venue_sync::reconcile::{ReconcileError, Reconciler, ViewQuality};
use venue_sync::store::{FetchKind, InMemoryStore, Snapshot};
use venue_sync::sync::{SyncError, Synchronizer};

// ── Test infrastructure ──────────────────────────────────────

fn store_from(snapshot: serde_json::Value) -> Arc<InMemoryStore> {
    let snapshot: Snapshot = serde_json::from_value(snapshot).unwrap();
    Arc::new(InMemoryStore::from_snapshot(snapshot))
}

fn reconciler(store: &Arc<InMemoryStore>) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(store.clone(), ReconcileConfig::default()))
}

fn synchronizer(store: &Arc<InMemoryStore>, resync_after_mutation: bool) -> Synchronizer {
    Synchronizer::new(
        reconciler(store),
        store.clone(),
        Arc::new(NoticeHub::new()),
        ReservationFilter::default(),
        SyncConfig { resync_after_mutation },
    )
}

/// A small venue: two rooms, a wedding with two room bookings, a walk-in
/// booked against a room label, and one person who is both owner and staff.
struct Venue {
    snapshot: serde_json::Value,
    room_c: Ulid,
    walk_in: Ulid,
    wedding: Ulid,
    wedding_rooms: [Ulid; 2],
    staff: Ulid,
}

fn venue() -> Venue {
    let room_a = Ulid::new();
    let room_c = Ulid::new();
    let wedding_type = Ulid::new();
    let staff = Ulid::new();
    let wedding = Ulid::new();
    let walk_in = Ulid::new();
    let wedding_rooms = [Ulid::new(), Ulid::new()];

    let snapshot = json!({
        "rooms": [
            { "id": room_a, "label": "A", "name": "Alder", "category": "double" },
            { "id": room_c, "label": "C", "name": "Cedar", "category": "suite" },
        ],
        "event_types": [{ "id": wedding_type, "title": "Wedding" }],
        "persons": [
            { "id": staff, "name": "Marco", "surname": "Rossi", "email": "marco@example.com" },
        ],
        "room_reservations": [
            {
                "id": walk_in, "check_in": "2026-05-01", "check_out": "2026-05-03",
                "room_ref": "C", "event_ref": null, "status": "confirmed",
            },
            {
                "id": wedding_rooms[0], "check_in": "2026-06-12", "check_out": "2026-06-14",
                "room_ref": room_a, "room_label": "A", "event_ref": wedding,
            },
            {
                "id": wedding_rooms[1], "check_in": "2026-06-12", "check_out": "2026-06-14",
                "room_ref": room_c, "room_label": "", "event_ref": wedding,
            },
        ],
        "event_reservations": [
            {
                "id": wedding, "date": "2026-06-13", "event_type_ref": wedding_type,
                "owner_ref": staff, "first_name": "Giulia", "last_name": "Bianchi",
                "guest_count": 120,
                "linked_rooms": [
                    { "room_reservation_ref": wedding_rooms[0] },
                    { "room_reservation_ref": wedding_rooms[1] },
                ],
            },
        ],
    });

    Venue {
        snapshot,
        room_c,
        walk_in,
        wedding,
        wedding_rooms,
        staff,
    }
}

// ── Reconciliation ───────────────────────────────────────────

#[tokio::test]
async fn venue_reconciles_completely() {
    let v = venue();
    let store = store_from(v.snapshot);
    let view = reconciler(&store)
        .reconciled_view(&ReservationFilter::default())
        .await
        .unwrap();

    assert_eq!(view.count, 4);
    assert_eq!(view.quality, ViewQuality::Complete);
    let ids: Vec<Ulid> = view.items.iter().map(ViewItem::id).collect();
    assert_eq!(ids[0], v.walk_in);
    assert_eq!(ids[3], v.wedding);

    let walk_in = view.rooms().find(|r| r.raw.id == v.walk_in).unwrap();
    assert_eq!(walk_in.room_details.label, "C");
    assert_eq!(walk_in.room_details.id, Some(v.room_c));

    let wedding = view.events().find(|e| e.raw.id == v.wedding).unwrap();
    assert_eq!(wedding.event_type_details.title, "Wedding");
    assert_eq!(wedding.linked_room_count, 2);
    let labels: Vec<&str> = wedding.linked_room_details.iter().map(|l| l.label.as_str()).collect();
    // The second booking has a blank snapshot, so its label comes from the room.
    assert_eq!(labels, vec!["A", "C"]);
    assert_eq!(wedding.owner_details.display_name(), "Marco Rossi");
}

#[tokio::test]
async fn missing_linked_reservation_shows_question_mark() {
    let event = Ulid::new();
    let rr9 = Ulid::new();
    let store = store_from(json!({
        "event_reservations": [
            {
                "id": event, "date": "2026-02-02",
                "linked_rooms": [{ "room_reservation_ref": rr9 }],
            },
        ],
    }));

    let view = reconciler(&store)
        .reconciled_view(&ReservationFilter::default())
        .await
        .unwrap();
    let json = serde_json::to_value(&view).unwrap();
    let link = &json["items"][0]["linked_room_details"][0];
    assert_eq!(link["label"], "?");
    assert_eq!(link["room_reservation_ref"], rr9.to_string());
    assert!(link["room_reservation_details"]["id"].is_null());
    assert_eq!(link["room_reservation_details"]["room_label"], "?");
    assert_eq!(json["quality"]["state"], "degraded");
    assert_eq!(json["quality"]["unresolved"], 1);
}

#[tokio::test]
async fn outage_of_two_collaborators_is_unavailable() {
    let v = venue();
    let store = store_from(v.snapshot);
    store.fail(FetchKind::Rooms);
    store.fail(FetchKind::EventTypes);

    let err = reconciler(&store)
        .reconciled_view(&ReservationFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Unavailable { ref failed, entities: 2 } if failed.len() == 2
    ));
    assert!(err.to_string().contains("unavailable"));
}

#[tokio::test]
async fn concurrent_passes_are_independent() {
    let v = venue();
    let store = store_from(v.snapshot);
    let reconciler = reconciler(&store);
    let filter = ReservationFilter::default();

    let views = join_all((0..8).map(|_| reconciler.reconciled_view(&filter))).await;
    let first = views[0].as_ref().unwrap();
    for view in &views {
        assert_eq!(view.as_ref().unwrap(), first);
    }
}

// ── Synchronizer ─────────────────────────────────────────────

#[tokio::test]
async fn assign_via_room_then_delete_event() {
    let v = venue();
    let store = store_from(v.snapshot);
    let sync = synchronizer(&store, true);
    sync.resync().await.unwrap();
    let mut notices = sync.notify().subscribe_all();

    sync.assign(v.wedding_rooms[0], RecordKind::Room, v.staff).await.unwrap();
    sync.check_invariants().await.unwrap();
    match notices.recv().await.unwrap() {
        SyncNotice::EventAssigned { event_id, via_room, .. } => {
            assert_eq!(event_id, v.wedding);
            assert_eq!(via_room, Some(v.wedding_rooms[0]));
        }
        other => panic!("unexpected notice {other:?}"),
    }
    sync.settle().await;
    sync.check_invariants().await.unwrap();
    for room in v.wedding_rooms {
        let r = sync.room(&room).await.unwrap();
        assert_eq!(r.raw.staff_ref, Reference::from(v.staff));
        assert_eq!(r.staff_details.name, "Marco");
    }

    sync.delete_event(v.wedding).await.unwrap();
    sync.check_invariants().await.unwrap();
    sync.settle().await;
    sync.check_invariants().await.unwrap();

    assert!(sync.event(&v.wedding).await.is_none());
    for room in v.wedding_rooms {
        let r = sync.room(&room).await.unwrap();
        assert_eq!(r.raw.event_ref, Reference::Absent);
        assert_eq!(r.raw.status, ReservationStatus::BASELINE);
        assert_eq!(r.raw.staff_ref, Reference::Absent);
    }
    assert_eq!(sync.items().await.len(), 3);
}

#[tokio::test]
async fn concurrent_assignments_keep_invariants() {
    let v = venue();
    let store = store_from(v.snapshot);
    let sync = synchronizer(&store, false);
    sync.resync().await.unwrap();

    let targets = [
        (v.wedding, RecordKind::Event),
        (v.wedding_rooms[0], RecordKind::Room),
        (v.wedding_rooms[1], RecordKind::Room),
        (v.walk_in, RecordKind::Room),
    ];
    let results = join_all(targets.iter().map(|&(id, kind)| sync.assign(id, kind, v.staff))).await;
    for result in results {
        match result {
            Ok(_) | Err(SyncError::Busy(_)) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    sync.check_invariants().await.unwrap();
}

#[tokio::test]
async fn status_patch_on_linked_room_confirms_the_event() {
    let v = venue();
    let store = store_from(v.snapshot);
    let sync = synchronizer(&store, true);
    sync.resync().await.unwrap();

    sync.update_field(
        v.wedding_rooms[1],
        RecordKind::Room,
        FieldPatch::Status(ReservationStatus::Confirmed),
    )
    .await
    .unwrap();
    sync.settle().await;

    assert_eq!(store.event_reservation(&v.wedding).unwrap().status, ReservationStatus::Confirmed);
    let event = sync.event(&v.wedding).await.unwrap();
    assert_eq!(event.raw.status, ReservationStatus::Confirmed);
    assert!(
        event
            .linked_room_details
            .iter()
            .all(|l| l.room_reservation_details.status == ReservationStatus::Confirmed)
    );
    sync.check_invariants().await.unwrap();
}
