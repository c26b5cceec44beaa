use std::collections::BTreeSet;

use ulid::Ulid;

use crate::model::*;
use crate::notify::SyncNotice;

use super::{Plan, SyncCache, SyncError, Synchronizer, Write};

/// Where a linked-field change on `id` actually lands: the event itself, the
/// event a room belongs to, or a room with no event.
enum Target {
    Event { event_id: Ulid, via_room: Option<Ulid> },
    LoneRoom(Ulid),
}

fn target_of(cache: &SyncCache, id: Ulid, kind: RecordKind) -> Result<Target, SyncError> {
    cache.expect_kind(id, kind)?;
    match kind {
        RecordKind::Event => Ok(Target::Event {
            event_id: id,
            via_room: None,
        }),
        RecordKind::Room => {
            let Some(event_id) = cache.room(&id).and_then(|room| room.event_id()) else {
                return Ok(Target::LoneRoom(id));
            };
            if cache.event(&event_id).is_none() {
                return Err(SyncError::InvariantViolation(format!(
                    "room {id} belongs to event {event_id}, which is not cached"
                )));
            }
            Ok(Target::Event {
                event_id,
                via_room: Some(id),
            })
        }
    }
}

fn with_event_first(event_id: Ulid, rooms: &[Ulid]) -> Vec<Ulid> {
    let mut affected = Vec::with_capacity(rooms.len() + 1);
    affected.push(event_id);
    affected.extend_from_slice(rooms);
    affected
}

fn plan_staff(
    cache: &mut SyncCache,
    id: Ulid,
    kind: RecordKind,
    staff: Option<Ulid>,
) -> Result<Plan, SyncError> {
    match target_of(cache, id, kind)? {
        Target::Event { event_id, via_room } => {
            if cache.event_staffed_with(event_id, staff) {
                return Ok(Plan::noop());
            }
            let rooms = cache.set_event_staff(event_id, staff);
            let mut writes = vec![Write::Assignment {
                id: event_id,
                kind: RecordKind::Event,
                staff,
            }];
            writes.extend(rooms.iter().map(|&room_id| Write::Assignment {
                id: room_id,
                kind: RecordKind::Room,
                staff,
            }));
            let notice = match staff {
                Some(staff_id) => SyncNotice::EventAssigned {
                    event_id,
                    staff_id,
                    via_room,
                },
                None => SyncNotice::EventUnassigned { event_id, via_room },
            };
            Ok(Plan {
                affected: with_event_first(event_id, &rooms),
                writes,
                notice: Some(notice),
            })
        }
        Target::LoneRoom(room_id) => {
            let wanted = Reference::from(staff);
            if cache.room(&room_id).is_some_and(|room| room.raw.staff_ref == wanted) {
                return Ok(Plan::noop());
            }
            cache.set_room_staff(room_id, staff);
            Ok(Plan {
                affected: vec![room_id],
                writes: vec![Write::Assignment {
                    id: room_id,
                    kind: RecordKind::Room,
                    staff,
                }],
                notice: Some(SyncNotice::RoomAssigned {
                    room_id,
                    staff_id: staff,
                }),
            })
        }
    }
}

fn plan_status(
    cache: &mut SyncCache,
    id: Ulid,
    kind: RecordKind,
    status: ReservationStatus,
) -> Result<Plan, SyncError> {
    let patch = FieldPatch::Status(status);
    match target_of(cache, id, kind)? {
        Target::Event { event_id, via_room } => {
            if cache.event_has_status(event_id, status) {
                return Ok(Plan::noop());
            }
            let rooms = cache.set_event_status(event_id, status);
            let mut writes = vec![Write::Patch {
                id: event_id,
                kind: RecordKind::Event,
                patch: patch.clone(),
            }];
            writes.extend(rooms.iter().map(|&room_id| Write::Patch {
                id: room_id,
                kind: RecordKind::Room,
                patch: patch.clone(),
            }));
            Ok(Plan {
                affected: with_event_first(event_id, &rooms),
                writes,
                notice: Some(SyncNotice::StatusChanged {
                    id: event_id,
                    kind: RecordKind::Event,
                    status,
                    via_room,
                }),
            })
        }
        Target::LoneRoom(room_id) => {
            if cache.room(&room_id).is_some_and(|room| room.raw.status == status) {
                return Ok(Plan::noop());
            }
            cache.set_room_status(room_id, status);
            Ok(Plan {
                affected: vec![room_id],
                writes: vec![Write::Patch {
                    id: room_id,
                    kind: RecordKind::Room,
                    patch,
                }],
                notice: Some(SyncNotice::StatusChanged {
                    id: room_id,
                    kind: RecordKind::Room,
                    status,
                    via_room: None,
                }),
            })
        }
    }
}

/// Reservations listed on the event that resolved remotely but are not in
/// the cache. Dangling entries have nothing to unlink.
fn uncached_links(cache: &SyncCache, event_id: Ulid) -> BTreeSet<Ulid> {
    let Some(event) = cache.event(&event_id) else {
        return BTreeSet::new();
    };
    event
        .linked_room_details
        .iter()
        .filter_map(|link| link.room_reservation_details.id)
        .filter(|room_id| cache.room(room_id).is_none())
        .collect()
}

impl Synchronizer {
    /// Assign staff. A room that belongs to an event is never assigned on its
    /// own: the request is redirected to the event, which cascades to every
    /// linked room.
    pub async fn assign(
        &self,
        id: Ulid,
        kind: RecordKind,
        staff: Ulid,
    ) -> Result<Vec<Ulid>, SyncError> {
        self.transition("assign", id, |cache| plan_staff(cache, id, kind, Some(staff)))
            .await
    }

    /// Clear staff, with the same redirect as [`Synchronizer::assign`].
    pub async fn unassign(&self, id: Ulid, kind: RecordKind) -> Result<Vec<Ulid>, SyncError> {
        self.transition("unassign", id, |cache| plan_staff(cache, id, kind, None))
            .await
    }

    /// Change status, with the same cascade and redirect as assignment.
    pub async fn set_status(
        &self,
        id: Ulid,
        kind: RecordKind,
        status: ReservationStatus,
    ) -> Result<Vec<Ulid>, SyncError> {
        self.transition("set_status", id, |cache| plan_status(cache, id, kind, status))
            .await
    }

    /// Detach a room from `event_id`. Unlinking a room that has no event is a no-op.
    pub async fn unlink(&self, room_id: Ulid, event_id: Ulid) -> Result<Vec<Ulid>, SyncError> {
        self.transition("unlink", room_id, |cache| {
            cache.expect_kind(room_id, RecordKind::Room)?;
            match cache.room(&room_id).and_then(|room| room.event_id()) {
                None => Ok(Plan::noop()),
                Some(current) if current != event_id => {
                    Err(SyncError::NotLinked { room_id, event_id })
                }
                Some(_) => {
                    cache.unlink_room(room_id, event_id);
                    Ok(Plan {
                        affected: vec![room_id, event_id],
                        writes: vec![Write::Link {
                            room_id,
                            event_id: None,
                        }],
                        notice: Some(SyncNotice::RoomUnlinked { room_id, event_id }),
                    })
                }
            }
        })
        .await
    }

    /// Unlink every room of the event, then remove the event. Rooms the
    /// filter kept out of the cache are unlinked remotely as well.
    pub async fn delete_event(&self, event_id: Ulid) -> Result<Vec<Ulid>, SyncError> {
        let affected = self
            .transition("delete_event", event_id, |cache| {
                cache.expect_kind(event_id, RecordKind::Event)?;
                let cached = cache.linked_rooms_of(event_id);
                let mut unlinked = cached.clone();
                unlinked.extend(uncached_links(cache, event_id));
                for &room_id in &cached {
                    cache.unlink_room(room_id, event_id);
                }
                cache.remove_event(&event_id);

                let mut writes: Vec<Write> = unlinked
                    .iter()
                    .map(|&room_id| Write::Link {
                        room_id,
                        event_id: None,
                    })
                    .collect();
                writes.push(Write::DeleteEvent(event_id));
                Ok(Plan {
                    affected: with_event_first(event_id, &cached),
                    writes,
                    notice: Some(SyncNotice::EventDeleted { event_id, unlinked }),
                })
            })
            .await?;
        self.notify().remove(&event_id);
        Ok(affected)
    }

    /// Apply one field change. Staff and status changes go through the
    /// cascading operations; anything else touches only the named record.
    pub async fn update_field(
        &self,
        id: Ulid,
        kind: RecordKind,
        patch: FieldPatch,
    ) -> Result<Vec<Ulid>, SyncError> {
        match patch {
            FieldPatch::Staff(Some(staff)) => self.assign(id, kind, staff).await,
            FieldPatch::Staff(None) => self.unassign(id, kind).await,
            FieldPatch::Status(status) => self.set_status(id, kind, status).await,
            patch => {
                let op = crate::observability::patch_label(&patch);
                self.transition(op, id, |cache| {
                    cache.expect_kind(id, kind)?;
                    if !cache.patch_record(id, kind, &patch) {
                        return Ok(Plan::noop());
                    }
                    Ok(Plan {
                        affected: vec![id],
                        writes: vec![Write::Patch { id, kind, patch: patch.clone() }],
                        notice: Some(SyncNotice::Patched { id, kind }),
                    })
                })
                .await
            }
        }
    }
}
