/// Optimistic mutation pipeline: apply locally, persist with a deadline,
/// reconcile the canonical result or roll back.
///
/// Per entity, unresolved mutations form a chain with one rollback target:
/// the last confirmed state before the oldest in-flight mutation. Only the
/// newest mutation of a chain is authoritative for rollback — a failure of
/// an older one while a newer one is in flight changes nothing, and a
/// success of an older one merely becomes the new rollback target. This is
/// last-issued-wins: completion order cannot reorder issuance order.
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::remote::{DurableStore, RemoteError};
use crate::store::CardStore;
use crate::types::{Card, CardDraft, CardPatch, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Move,
    Delete,
}

#[derive(Debug, Error)]
pub enum MutationError {
    /// Rejected locally; no network call was made and nothing changed.
    #[error("validation: {0}")]
    Validation(String),

    /// Persist failed in a way that may succeed on resubmit. The local
    /// change has been rolled back.
    #[error("transient store failure: {0}")]
    Transient(#[source] RemoteError),

    /// Persist was rejected; resubmitting the same mutation will not help.
    /// The local change has been rolled back.
    #[error("mutation rejected: {0}")]
    Rejected(#[source] RemoteError),
}

impl MutationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationError::Transient(_))
    }

    fn from_remote(err: RemoteError) -> Self {
        if err.is_retryable() {
            MutationError::Transient(err)
        } else {
            MutationError::Rejected(err)
        }
    }
}

/// Bookkeeping for the unresolved mutations of one entity.
struct PendingChain {
    /// State to restore if the newest mutation fails. None = absent.
    rollback: Option<Card>,
    /// Issuance sequence of the newest mutation.
    latest_seq: u64,
    /// Issue time of the newest mutation, compared against feed event
    /// timestamps by the merger.
    latest_issued_at: DateTime<Utc>,
    /// Kind of the newest mutation, for log lines.
    latest_kind: MutationKind,
    /// Unresolved mutation count in this chain.
    in_flight: usize,
    /// The chain started with a create; the entity id is provisional
    /// until the server assigns the real one.
    creating: bool,
}

pub struct OptimisticController {
    store: Arc<CardStore>,
    remote: Arc<dyn DurableStore>,
    /// entity id -> pending chain
    pending: Mutex<HashMap<String, PendingChain>>,
    next_seq: AtomicU64,
    persist_timeout: Duration,
}

impl OptimisticController {
    pub fn new(
        store: Arc<CardStore>,
        remote: Arc<dyn DurableStore>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            persist_timeout,
        }
    }

    /// Create a card optimistically. A provisional entity with a local id
    /// is visible immediately; on acknowledgment it is swapped for the
    /// server-assigned canonical card.
    pub async fn create_card(&self, draft: CardDraft) -> Result<Card, MutationError> {
        if draft.project_id.is_empty() {
            return Err(MutationError::Validation("missing project scope".into()));
        }
        validate_position(draft.position)?;

        let provisional_id = format!("local-{}", Uuid::new_v4());
        let seq = self.begin(&provisional_id, None, MutationKind::Create);
        self.store.upsert(Card {
            id: provisional_id.clone(),
            project_id: draft.project_id.clone(),
            position: draft.position,
            collapsed: draft.collapsed,
            payload: draft.payload.clone(),
            version: 0,
            updated_at: Utc::now(),
        });

        match self.persist(self.remote.create_card(draft)).await {
            Ok(card) => {
                self.settle_success(&provisional_id, seq, Some(card.clone()));
                Ok(card)
            }
            Err(err) => {
                self.settle_failure(&provisional_id, seq);
                Err(MutationError::from_remote(err))
            }
        }
    }

    /// Apply a partial update optimistically.
    pub async fn update_card(&self, id: &str, patch: CardPatch) -> Result<Card, MutationError> {
        self.mutate(id, patch, MutationKind::Update).await
    }

    /// Move a card to a new logical position.
    pub async fn move_card(&self, id: &str, position: Position) -> Result<Card, MutationError> {
        self.mutate(id, CardPatch::move_to(position), MutationKind::Move)
            .await
    }

    /// Delete a card optimistically; rollback reinserts the snapshot.
    pub async fn delete_card(&self, id: &str) -> Result<(), MutationError> {
        let current = self.guard_known(id)?;
        let seq = self.begin(id, Some(current), MutationKind::Delete);
        self.store.remove(id);

        match self.persist(self.remote.delete_card(id)).await {
            Ok(()) => {
                self.settle_success(id, seq, None);
                Ok(())
            }
            Err(err) => {
                self.settle_failure(id, seq);
                Err(MutationError::from_remote(err))
            }
        }
    }

    /// Whether the entity has any unresolved mutation.
    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(id)
    }

    /// Whether an unresolved local mutation for this entity was issued
    /// after the given server timestamp. Used by the merger to decide
    /// whether a feed event is stale relative to local optimistic state.
    pub fn pending_issued_after(&self, id: &str, server_ts: DateTime<Utc>) -> bool {
        self.pending
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|chain| chain.latest_issued_at > server_ts)
    }

    async fn mutate(
        &self,
        id: &str,
        patch: CardPatch,
        kind: MutationKind,
    ) -> Result<Card, MutationError> {
        if patch.is_empty() {
            return Err(MutationError::Validation("empty patch".into()));
        }
        if let Some(position) = patch.position {
            validate_position(position)?;
        }
        let current = self.guard_known(id)?;

        let seq = self.begin(id, Some(current.clone()), kind);
        let mut local = current;
        local.apply_patch(&patch);
        local.updated_at = Utc::now();
        self.store.upsert(local);

        match self.persist(self.remote.update_card(id, patch)).await {
            Ok(canonical) => {
                self.settle_success(id, seq, Some(canonical.clone()));
                Ok(canonical)
            }
            Err(err) => {
                self.settle_failure(id, seq);
                Err(MutationError::from_remote(err))
            }
        }
    }

    /// Validation shared by update-like mutations: the entity must be in
    /// the local working set and must not be a provisional create that is
    /// still awaiting its server id.
    fn guard_known(&self, id: &str) -> Result<Card, MutationError> {
        let current = self
            .store
            .get(id)
            .ok_or_else(|| MutationError::Validation(format!("unknown card: {}", id)))?;
        let creating = self
            .pending
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|chain| chain.creating);
        if creating {
            return Err(MutationError::Validation(format!(
                "card {} is still being created",
                id
            )));
        }
        Ok(current)
    }

    /// Record a new mutation in the entity's pending chain. The snapshot
    /// only seeds the rollback target when the chain is fresh; an existing
    /// chain keeps its older target.
    fn begin(&self, entity_id: &str, snapshot: Option<Card>, kind: MutationKind) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().unwrap();
        let chain = pending
            .entry(entity_id.to_string())
            .or_insert_with(|| PendingChain {
                rollback: snapshot,
                latest_seq: seq,
                latest_issued_at: Utc::now(),
                latest_kind: kind,
                in_flight: 0,
                creating: kind == MutationKind::Create,
            });
        chain.latest_seq = seq;
        chain.latest_issued_at = Utc::now();
        chain.latest_kind = kind;
        chain.in_flight += 1;
        seq
    }

    async fn persist<T>(
        &self,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.persist_timeout, fut).await {
            Ok(result) => result,
            // The dropped request may still commit server-side; if it
            // does, the change feed brings the result back in as a
            // regular remote change.
            Err(_) => Err(RemoteError::Timeout(self.persist_timeout.as_millis() as u64)),
        }
    }

    /// Resolve a successful persist. `canonical` is the server's entity
    /// (None for deletes). Only the newest mutation commits the canonical
    /// value to the store; an older success just becomes the rollback
    /// target for whatever is still in flight.
    fn settle_success(&self, entity_id: &str, seq: u64, canonical: Option<Card>) {
        let mut pending = self.pending.lock().unwrap();
        let Some(chain) = pending.get_mut(entity_id) else {
            // Chain already rolled back by a newer failure; the server
            // side of this success will come back via the feed.
            return;
        };
        chain.in_flight -= 1;

        if seq != chain.latest_seq {
            chain.rollback = canonical;
            return;
        }

        pending.remove(entity_id);
        drop(pending);

        match canonical {
            Some(card) => {
                if card.id != entity_id {
                    // Provisional create: swap the local id for the
                    // server-assigned one.
                    self.store.remove(entity_id);
                }
                self.store.upsert(card);
            }
            None => {
                self.store.remove(entity_id);
            }
        }
    }

    /// Resolve a failed persist. Rolls back only when the failing
    /// mutation is the newest of its chain. Returns whether a rollback
    /// was applied.
    fn settle_failure(&self, entity_id: &str, seq: u64) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let Some(chain) = pending.get_mut(entity_id) else {
            return false;
        };
        chain.in_flight -= 1;

        if seq != chain.latest_seq {
            log::debug!(
                "[eisen.optimistic.settle] Stale failure for {} ignored (newer mutation in flight)",
                entity_id
            );
            return false;
        }

        let rollback = chain.rollback.take();
        let kind = chain.latest_kind;
        pending.remove(entity_id);
        drop(pending);

        log::warn!(
            "[eisen.optimistic.rollback] {:?} on {} failed, restoring last confirmed state",
            kind,
            entity_id
        );
        match rollback {
            Some(card) => {
                self.store.upsert(card);
            }
            None => {
                self.store.remove(entity_id);
            }
        }
        true
    }
}

fn validate_position(position: Position) -> Result<(), MutationError> {
    if position.x.is_finite() && position.y.is_finite() {
        Ok(())
    } else {
        Err(MutationError::Validation(
            "position must be finite".into(),
        ))
    }
}
