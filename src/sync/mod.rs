mod cache;
mod error;
mod ops;

pub use cache::SyncCache;
pub use error::SyncError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashSet;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::SyncConfig;
use crate::model::*;
use crate::notify::{NoticeHub, SyncNotice};
use crate::reconcile::{ReconcileError, ReconciledView, Reconciler};
use crate::store::MutationGateway;

// ── Transition plumbing ──────────────────────────────────

/// One remote write issued on behalf of a transition.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Write {
    Assignment {
        id: Ulid,
        kind: RecordKind,
        staff: Option<Ulid>,
    },
    Link {
        room_id: Ulid,
        event_id: Option<Ulid>,
    },
    DeleteEvent(Ulid),
    Patch {
        id: Ulid,
        kind: RecordKind,
        patch: FieldPatch,
    },
}

impl Write {
    fn target(&self) -> Ulid {
        match self {
            Write::Assignment { id, .. } | Write::Patch { id, .. } | Write::DeleteEvent(id) => *id,
            Write::Link { room_id, .. } => *room_id,
        }
    }
}

/// What a transition did to the cache, and what the collaborators must be
/// told for the change to stick. No writes means the transition was a no-op.
#[derive(Debug, Default)]
pub(super) struct Plan {
    pub affected: Vec<Ulid>,
    pub writes: Vec<Write>,
    pub notice: Option<SyncNotice>,
}

impl Plan {
    pub fn noop() -> Self {
        Self::default()
    }
}

struct CacheState {
    cache: SyncCache,
    /// Generation of the last refetch applied. Older ones are discarded.
    applied_generation: u64,
}

struct Shared {
    state: Mutex<CacheState>,
    notify: Arc<NoticeHub>,
    generation: AtomicU64,
}

impl Shared {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the whole cache with a fresh view, unless a newer one landed first.
    async fn apply_view(&self, generation: u64, view: &ReconciledView) -> bool {
        let mut state = self.state.lock().await;
        if generation <= state.applied_generation {
            debug!(generation, applied = state.applied_generation, "discarding stale refetch");
            metrics::counter!(crate::observability::RESYNCS_TOTAL, "status" => "stale")
                .increment(1);
            return false;
        }
        state.cache = SyncCache::from_view(view);
        state.applied_generation = generation;
        let records = state.cache.len();
        metrics::counter!(crate::observability::RESYNCS_TOTAL, "status" => "applied").increment(1);
        metrics::gauge!(crate::observability::CACHE_RECORDS).set(records as f64);
        info!(generation, records, "cache refreshed");
        self.notify.send(&SyncNotice::Resynced { generation, records });
        true
    }
}

/// Releases a record claim when the transition ends.
struct Claim<'a> {
    in_flight: &'a DashSet<Ulid>,
    id: Ulid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

/// Owns every cross-entity write against the cached resolved collection.
///
/// Mutations are serialized through one lock, applied to the cache
/// optimistically, pushed to the collaborators, and followed by a
/// background refetch that replaces the cache wholesale.
pub struct Synchronizer {
    shared: Arc<Shared>,
    gateway: Arc<dyn MutationGateway>,
    reconciler: Arc<Reconciler>,
    filter: ReservationFilter,
    config: SyncConfig,
    in_flight: DashSet<Ulid>,
    pending: StdMutex<Vec<JoinHandle<()>>>,
}

impl Synchronizer {
    pub fn new(
        reconciler: Arc<Reconciler>,
        gateway: Arc<dyn MutationGateway>,
        notify: Arc<NoticeHub>,
        filter: ReservationFilter,
        config: SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    cache: SyncCache::default(),
                    applied_generation: 0,
                }),
                notify,
                generation: AtomicU64::new(0),
            }),
            gateway,
            reconciler,
            filter,
            config,
            in_flight: DashSet::new(),
            pending: StdMutex::new(Vec::new()),
        }
    }

    pub fn notify(&self) -> &Arc<NoticeHub> {
        &self.shared.notify
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn items(&self) -> Vec<ViewItem> {
        self.shared.state.lock().await.cache.items()
    }

    pub async fn room(&self, id: &Ulid) -> Option<ResolvedRoomReservation> {
        self.shared.state.lock().await.cache.room(id).cloned()
    }

    pub async fn event(&self, id: &Ulid) -> Option<ResolvedEventReservation> {
        self.shared.state.lock().await.cache.event(id).cloned()
    }

    pub async fn snapshot(&self) -> SyncCache {
        self.shared.state.lock().await.cache.clone()
    }

    pub async fn check_invariants(&self) -> Result<(), SyncError> {
        self.shared.state.lock().await.cache.check_invariants()
    }

    // ── Refetch ──────────────────────────────────────────────

    /// Run a reconciliation pass now and replace the cache with it.
    /// Returns whether the result was applied.
    pub async fn resync(&self) -> Result<bool, ReconcileError> {
        let generation = self.shared.next_generation();
        let view = self.reconciler.reconciled_view(&self.filter).await.inspect_err(|e| {
            warn!(generation, error = %e, "refetch failed, keeping cache");
            metrics::counter!(crate::observability::RESYNCS_TOTAL, "status" => "failed")
                .increment(1);
        })?;
        Ok(self.shared.apply_view(generation, &view).await)
    }

    /// Replace the cache with a view the caller already holds, as if it had
    /// been produced by a refetch started now.
    pub async fn load(&self, view: &ReconciledView) -> bool {
        let generation = self.shared.next_generation();
        self.shared.apply_view(generation, view).await
    }

    fn spawn_resync(&self, reason: &'static str) {
        let generation = self.shared.next_generation();
        let shared = self.shared.clone();
        let reconciler = self.reconciler.clone();
        let filter = self.filter.clone();
        debug!(generation, reason, "scheduling background refetch");
        let handle = tokio::spawn(async move {
            match reconciler.reconciled_view(&filter).await {
                Ok(view) => {
                    shared.apply_view(generation, &view).await;
                }
                Err(e) => {
                    warn!(generation, error = %e, "background refetch failed, keeping cache");
                    metrics::counter!(crate::observability::RESYNCS_TOTAL, "status" => "failed")
                        .increment(1);
                }
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every background refetch scheduled so far.
    pub async fn settle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background refetch task ended abnormally");
                }
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────

    fn claim(&self, id: Ulid) -> Result<Claim<'_>, SyncError> {
        if !self.in_flight.insert(id) {
            return Err(SyncError::Busy(id));
        }
        Ok(Claim {
            in_flight: &self.in_flight,
            id,
        })
    }

    /// Run one transition: plan it against the cache, verify the invariants,
    /// push the writes, then notify and refetch. Any failure restores the
    /// cache to how it was before the transition started.
    pub(super) async fn transition<F>(
        &self,
        op: &'static str,
        id: Ulid,
        plan: F,
    ) -> Result<Vec<Ulid>, SyncError>
    where
        F: FnOnce(&mut SyncCache) -> Result<Plan, SyncError>,
    {
        let _claim = self.claim(id).inspect_err(|_| {
            metrics::counter!(crate::observability::SYNC_OPS_TOTAL, "op" => op, "status" => "busy")
                .increment(1);
        })?;
        let mut state = self.shared.state.lock().await;
        let before = state.cache.clone();

        let planned = plan(&mut state.cache).and_then(|plan| {
            state.cache.check_invariants()?;
            Ok(plan)
        });
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                state.cache = before;
                if let SyncError::InvariantViolation(reason) = &e {
                    drop(state);
                    self.roll_back(op, id, reason, "invariant");
                    self.spawn_resync("invariant violation");
                } else {
                    metrics::counter!(
                        crate::observability::SYNC_OPS_TOTAL,
                        "op" => op,
                        "status" => "error"
                    )
                    .increment(1);
                }
                return Err(e);
            }
        };

        if plan.writes.is_empty() {
            debug!(op, %id, "no-op transition");
            metrics::counter!(crate::observability::SYNC_OPS_TOTAL, "op" => op, "status" => "noop")
                .increment(1);
            return Ok(plan.affected);
        }

        for (done, write) in plan.writes.iter().enumerate() {
            if let Err(error) = self.push(write).await {
                state.cache = before;
                drop(state);
                let target = write.target();
                self.roll_back(op, id, &error.to_string(), "rejected");
                // Earlier writes already landed remotely; only a refetch can
                // tell what the collaborators hold now.
                if done > 0 {
                    self.spawn_resync("partial write");
                }
                return Err(SyncError::Rejected { id: target, error });
            }
        }
        drop(state);

        debug!(
            op,
            %id,
            affected = plan.affected.len(),
            writes = plan.writes.len(),
            "transition applied"
        );
        metrics::counter!(crate::observability::SYNC_OPS_TOTAL, "op" => op, "status" => "ok")
            .increment(1);
        if let Some(notice) = &plan.notice {
            self.shared.notify.send(notice);
        }
        if self.config.resync_after_mutation {
            self.spawn_resync(op);
        }
        Ok(plan.affected)
    }

    async fn push(&self, write: &Write) -> Result<(), crate::store::StoreError> {
        match write {
            Write::Assignment { id, kind, staff } => {
                self.gateway.set_assignment(*id, *kind, *staff).await
            }
            Write::Link { room_id, event_id } => self.gateway.set_link(*room_id, *event_id).await,
            Write::DeleteEvent(id) => self.gateway.delete_event(*id).await,
            Write::Patch { id, kind, patch } => self.gateway.patch(*id, *kind, patch).await,
        }
    }

    fn roll_back(&self, op: &'static str, id: Ulid, reason: &str, label: &'static str) {
        warn!(op, %id, reason, "transition rolled back");
        metrics::counter!(
            crate::observability::SYNC_OPS_TOTAL,
            "op" => op,
            "status" => "rolled_back"
        )
        .increment(1);
        metrics::counter!(crate::observability::SYNC_ROLLBACKS_TOTAL, "reason" => label)
            .increment(1);
        self.shared.notify.send(&SyncNotice::RolledBack {
            id,
            reason: reason.to_string(),
        });
    }
}
