use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::store::FetchKind;

/// Whether a view is backed by every fetch it needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewQuality {
    Complete,
    /// Some references resolved to placeholders, either because a fetch
    /// degraded to empty or because the referenced record is gone.
    Degraded {
        failed_fetches: Vec<FetchKind>,
        unresolved: usize,
    },
}

impl ViewQuality {
    pub fn from_outcome(failed_fetches: Vec<FetchKind>, unresolved: usize) -> Self {
        if failed_fetches.is_empty() && unresolved == 0 {
            ViewQuality::Complete
        } else {
            ViewQuality::Degraded {
                failed_fetches,
                unresolved,
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ViewQuality::Complete)
    }
}

/// The dashboard view produced by one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledView {
    pub items: Vec<ViewItem>,
    pub count: usize,
    pub quality: ViewQuality,
}

impl ReconciledView {
    pub fn new(items: Vec<ViewItem>, quality: ViewQuality) -> Self {
        Self {
            count: items.len(),
            items,
            quality,
        }
    }

    pub fn rooms(&self) -> impl Iterator<Item = &ResolvedRoomReservation> {
        self.items.iter().filter_map(|item| match item {
            ViewItem::Room(room) => Some(room),
            ViewItem::Event(_) => None,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = &ResolvedEventReservation> {
        self.items.iter().filter_map(|item| match item {
            ViewItem::Event(event) => Some(event),
            ViewItem::Room(_) => None,
        })
    }
}

/// Merge both resolved collections into one list ordered by start date.
///
/// Records whose start date is missing or unparsable go last. The sort is
/// stable, but callers must not rely on the relative order of those records.
pub fn assemble(
    rooms: Vec<ResolvedRoomReservation>,
    events: Vec<ResolvedEventReservation>,
) -> Vec<ViewItem> {
    let mut items: Vec<ViewItem> = Vec::with_capacity(rooms.len() + events.len());
    items.extend(rooms.into_iter().map(ViewItem::Room));
    items.extend(events.into_iter().map(ViewItem::Event));
    items.sort_by_cached_key(|item| match item.start_ms() {
        Some(ms) => (false, ms),
        None => (true, 0),
    });
    items
}
