use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{RecordKind, ReservationStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Something the synchronizer wants the user to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum SyncNotice {
    /// Staff set on an event and all its rooms. `via_room` is set when the
    /// request named one of the rooms and was redirected to the event.
    EventAssigned {
        event_id: Ulid,
        staff_id: Ulid,
        via_room: Option<Ulid>,
    },
    EventUnassigned {
        event_id: Ulid,
        via_room: Option<Ulid>,
    },
    RoomAssigned {
        room_id: Ulid,
        staff_id: Option<Ulid>,
    },
    StatusChanged {
        id: Ulid,
        kind: RecordKind,
        status: ReservationStatus,
        via_room: Option<Ulid>,
    },
    RoomUnlinked {
        room_id: Ulid,
        event_id: Ulid,
    },
    EventDeleted {
        event_id: Ulid,
        unlinked: Vec<Ulid>,
    },
    Patched {
        id: Ulid,
        kind: RecordKind,
    },
    RolledBack {
        id: Ulid,
        reason: String,
    },
    Resynced {
        generation: u64,
        records: usize,
    },
}

impl SyncNotice {
    /// The record the notice is about, if any.
    pub fn record_id(&self) -> Option<Ulid> {
        match self {
            SyncNotice::EventAssigned { event_id, .. }
            | SyncNotice::EventUnassigned { event_id, .. }
            | SyncNotice::EventDeleted { event_id, .. } => Some(*event_id),
            SyncNotice::RoomAssigned { room_id, .. } | SyncNotice::RoomUnlinked { room_id, .. } => {
                Some(*room_id)
            }
            SyncNotice::StatusChanged { id, .. }
            | SyncNotice::Patched { id, .. }
            | SyncNotice::RolledBack { id, .. } => Some(*id),
            SyncNotice::Resynced { .. } => None,
        }
    }

    /// User-facing text.
    pub fn message(&self) -> String {
        match self {
            SyncNotice::EventAssigned { via_room: Some(_), .. } => {
                "Room belongs to an event: the whole event was assigned".to_string()
            }
            SyncNotice::EventAssigned { .. } => "Event and its rooms assigned".to_string(),
            SyncNotice::EventUnassigned { via_room: Some(_), .. } => {
                "Room belongs to an event: the whole event was unassigned".to_string()
            }
            SyncNotice::EventUnassigned { .. } => "Event and its rooms unassigned".to_string(),
            SyncNotice::RoomAssigned { staff_id: Some(_), .. } => "Room assigned".to_string(),
            SyncNotice::RoomAssigned { staff_id: None, .. } => "Room unassigned".to_string(),
            SyncNotice::StatusChanged { via_room: Some(_), status, .. } => {
                format!("Room belongs to an event: the whole event is now {}", status.as_str())
            }
            SyncNotice::StatusChanged { status, .. } => {
                format!("Status changed to {}", status.as_str())
            }
            SyncNotice::RoomUnlinked { .. } => "Room removed from its event".to_string(),
            SyncNotice::EventDeleted { unlinked, .. } => {
                format!("Event deleted, {} room(s) released", unlinked.len())
            }
            SyncNotice::Patched { .. } => "Reservation updated".to_string(),
            SyncNotice::RolledBack { reason, .. } => format!("Change undone: {reason}"),
            SyncNotice::Resynced { records, .. } => format!("Refreshed {records} reservation(s)"),
        }
    }
}

/// Broadcast hub for synchronizer notices, per record and global.
pub struct NoticeHub {
    channels: DashMap<Ulid, broadcast::Sender<SyncNotice>>,
    all: broadcast::Sender<SyncNotice>,
}

impl Default for NoticeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notices about one record. Creates the channel if needed.
    pub fn subscribe(&self, record_id: Ulid) -> broadcast::Receiver<SyncNotice> {
        let sender = self
            .channels
            .entry(record_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every notice.
    pub fn subscribe_all(&self) -> broadcast::Receiver<SyncNotice> {
        self.all.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: &SyncNotice) {
        let _ = self.all.send(notice.clone());
        if let Some(id) = notice.record_id()
            && let Some(sender) = self.channels.get(&id)
        {
            let _ = sender.send(notice.clone());
        }
    }

    /// Remove a record's channel (e.g. when the record is deleted).
    pub fn remove(&self, record_id: &Ulid) {
        self.channels.remove(record_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NoticeHub::new();
        let event_id = Ulid::new();
        let mut rx = hub.subscribe(event_id);
        let mut all = hub.subscribe_all();

        let notice = SyncNotice::EventAssigned {
            event_id,
            staff_id: Ulid::new(),
            via_room: None,
        };
        hub.send(&notice);

        assert_eq!(rx.recv().await.unwrap(), notice);
        assert_eq!(all.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn per_record_channel_only_sees_its_record() {
        let hub = NoticeHub::new();
        let watched = Ulid::new();
        let mut rx = hub.subscribe(watched);
        hub.send(&SyncNotice::Patched {
            id: Ulid::new(),
            kind: RecordKind::Room,
        });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NoticeHub::new();
        // No subscriber, should not panic
        hub.send(&SyncNotice::Resynced {
            generation: 1,
            records: 0,
        });
    }

    #[test]
    fn redirected_assignment_mentions_the_event() {
        let notice = SyncNotice::EventAssigned {
            event_id: Ulid::new(),
            staff_id: Ulid::new(),
            via_room: Some(Ulid::new()),
        };
        assert!(notice.message().contains("whole event"));
    }
}
