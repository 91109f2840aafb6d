/// The engine instance: one explicit context object owning the card
/// store, lock table, optimistic controller, drag controller and feed
/// consumer for the active project.
///
/// No module-level state: every instance is independent, so tests (and a
/// process embedding several projects) can run engines side by side.
/// Switching projects tears the old scope down completely — feed task
/// stopped, cards and locks cleared — before the new one is wired up.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::drag::DragController;
use crate::feed::merger::ChangeFeedMerger;
use crate::feed::types::ChangeFeed;
use crate::lock::{AcquireOutcome, Lock, LockManager, LockView};
use crate::optimistic::{MutationError, OptimisticController};
use crate::remote::{DurableStore, RemoteError};
use crate::store::{CardStore, StoreEvent, SubscriptionId};
use crate::types::{Card, CardDraft, CardPatch, Position};

/// Everything tied to one active project.
struct ProjectScope {
    project_id: String,
    merger: Arc<ChangeFeedMerger>,
    shutdown_tx: watch::Sender<bool>,
    merger_task: JoinHandle<()>,
}

pub struct MatrixEngine {
    config: EngineConfig,
    remote: Arc<dyn DurableStore>,
    feed: Arc<dyn ChangeFeed>,
    store: Arc<CardStore>,
    locks: Arc<LockManager>,
    controller: Arc<OptimisticController>,
    drag: DragController,
    scope: Mutex<Option<ProjectScope>>,
}

impl MatrixEngine {
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn DurableStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        let store = Arc::new(CardStore::new());
        let locks = Arc::new(LockManager::new());
        let controller = Arc::new(OptimisticController::new(
            store.clone(),
            remote.clone(),
            Duration::from_millis(config.persist_timeout_ms),
        ));
        let drag = DragController::new(
            store.clone(),
            locks.clone(),
            controller.clone(),
            config.participant.id.clone(),
        );
        Self {
            config,
            remote,
            feed,
            store,
            locks,
            controller,
            drag,
            scope: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CardStore> {
        &self.store
    }

    pub fn drag(&self) -> &DragController {
        &self.drag
    }

    pub fn active_project(&self) -> Option<String> {
        self.scope
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.project_id.clone())
    }

    /// Switch the engine to a project. The previous scope (if any) is torn
    /// down first: its feed task is stopped and its cards and locks are
    /// dropped, so a straggler event from the old project has nowhere to
    /// land. Returns the size of the freshly synced working set.
    pub async fn open_project(&self, project_id: &str) -> Result<usize, RemoteError> {
        self.teardown_scope();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let merger = Arc::new(ChangeFeedMerger::new(
            self.store.clone(),
            self.controller.clone(),
            self.remote.clone(),
            project_id.to_string(),
        ));
        // Subscribe before the initial sync so nothing committed in
        // between can fall into a gap.
        let feed_rx = self.feed.subscribe();
        let merger_task = tokio::spawn(merger.clone().run(feed_rx, shutdown_rx));

        {
            let mut scope = self.scope.lock().unwrap();
            *scope = Some(ProjectScope {
                project_id: project_id.to_string(),
                merger: merger.clone(),
                shutdown_tx,
                merger_task,
            });
        }

        let count = merger.resync().await?;
        log::info!(
            target: "eisen.engine",
            "Opened project {} with {} cards",
            project_id,
            count
        );
        Ok(count)
    }

    /// Re-fetch the active project's card set and replace the local scope.
    pub async fn refresh(&self) -> Result<usize, RemoteError> {
        let merger = {
            let scope = self.scope.lock().unwrap();
            scope.as_ref().map(|s| s.merger.clone())
        };
        match merger {
            Some(merger) => merger.resync().await,
            None => Ok(0),
        }
    }

    /// Tear down the active scope, if any.
    pub fn close(&self) {
        self.teardown_scope();
    }

    fn teardown_scope(&self) {
        let previous = self.scope.lock().unwrap().take();
        if let Some(scope) = previous {
            let _ = scope.shutdown_tx.send(true);
            scope.merger_task.abort();
            self.locks.clear();
            self.store.replace_project(&scope.project_id, Vec::new());
            log::info!(target: "eisen.engine", "Closed project {}", scope.project_id);
        }
    }

    /// Cards of the active project.
    pub fn cards(&self) -> Vec<Card> {
        match self.active_project() {
            Some(project_id) => self.store.list(&project_id),
            None => Vec::new(),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Create a card in the active project.
    pub async fn create_card(
        &self,
        position: Position,
        payload: serde_json::Value,
    ) -> Result<Card, MutationError> {
        let project_id = self
            .active_project()
            .ok_or_else(|| MutationError::Validation("no active project".into()))?;
        self.controller
            .create_card(CardDraft {
                project_id,
                position,
                collapsed: false,
                payload,
            })
            .await
    }

    /// Replace a card's opaque payload.
    pub async fn update_payload(
        &self,
        card_id: &str,
        payload: serde_json::Value,
    ) -> Result<Card, MutationError> {
        self.guard_unlocked(card_id)?;
        self.controller
            .update_card(card_id, CardPatch::set_payload(payload))
            .await
    }

    /// Collapse or expand a card. Touches only the rendered footprint;
    /// the stored position is deliberately left alone.
    pub async fn set_collapsed(
        &self,
        card_id: &str,
        collapsed: bool,
    ) -> Result<Card, MutationError> {
        self.guard_unlocked(card_id)?;
        self.controller
            .update_card(card_id, CardPatch::set_collapsed(collapsed))
            .await
    }

    pub async fn delete_card(&self, card_id: &str) -> Result<(), MutationError> {
        self.guard_unlocked(card_id)?;
        self.controller.delete_card(card_id).await
    }

    /// Claim a card for editing (idempotent renew for the same holder).
    pub fn begin_edit(&self, card_id: &str) -> AcquireOutcome {
        self.locks.acquire(card_id, &self.config.participant.id)
    }

    /// Explicit activity renewal while an edit session stays open.
    pub fn renew_edit(&self, card_id: &str) -> AcquireOutcome {
        self.locks.acquire(card_id, &self.config.participant.id)
    }

    pub fn end_edit(&self, card_id: &str) -> bool {
        self.locks.release(card_id, &self.config.participant.id)
    }

    pub fn lock_view(&self, card_id: &str) -> LockView {
        self.locks.view(card_id, &self.config.participant.id)
    }

    /// Feed in a lock record from another participant (relayed by the
    /// integration layer; lock distribution itself is outside the engine).
    pub fn observe_lock(&self, lock: Lock) {
        self.locks.observe(lock);
    }

    /// Editing-style mutations respect other participants' locks the same
    /// way drags do.
    fn guard_unlocked(&self, card_id: &str) -> Result<(), MutationError> {
        if self
            .locks
            .is_locked_by_other(card_id, &self.config.participant.id)
        {
            return Err(MutationError::Validation(format!(
                "card {} is locked by another participant",
                card_id
            )));
        }
        Ok(())
    }
}

impl Drop for MatrixEngine {
    fn drop(&mut self) {
        self.teardown_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParticipantIdentity;
    use crate::remote::memory::InMemoryStore;
    use crate::types::Position;

    fn make_engine(remote: &Arc<InMemoryStore>, participant: &str) -> MatrixEngine {
        let config = EngineConfig::new(ParticipantIdentity {
            id: participant.to_string(),
            name: participant.to_string(),
        });
        MatrixEngine::new(config, remote.clone(), remote.clone())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    #[tokio::test]
    async fn test_create_mutate_delete_round_trip() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        let card = engine
            .create_card(Position::new(100.0, 100.0), serde_json::json!({"content": "plan"}))
            .await
            .unwrap();
        assert_eq!(engine.cards().len(), 1);

        let card = engine.set_collapsed(&card.id, true).await.unwrap();
        assert!(card.collapsed);
        assert_eq!(card.position, Position::new(100.0, 100.0));

        engine.delete_card(&card.id).await.unwrap();
        settle().await;
        assert!(engine.cards().is_empty());
    }

    #[tokio::test]
    async fn test_own_write_echo_converges_to_one_card() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        let card = engine
            .create_card(Position::new(10.0, 20.0), serde_json::Value::Null)
            .await
            .unwrap();
        // Let the feed deliver the echo of our own insert.
        settle().await;

        let cards = engine.cards();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, card.id);
    }

    #[tokio::test]
    async fn test_remote_change_from_other_client_lands() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        // Another client writes directly to the durable store.
        remote
            .create_card(crate::types::CardDraft {
                project_id: "p1".to_string(),
                position: Position::new(300.0, 300.0),
                collapsed: false,
                payload: serde_json::Value::Null,
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(engine.cards().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_project_events_do_not_leak() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        remote
            .create_card(crate::types::CardDraft {
                project_id: "p2".to_string(),
                position: Position::new(1.0, 1.0),
                collapsed: false,
                payload: serde_json::Value::Null,
            })
            .await
            .unwrap();
        settle().await;
        assert!(engine.cards().is_empty());
    }

    #[tokio::test]
    async fn test_project_switch_swaps_working_set() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");

        engine.open_project("p1").await.unwrap();
        engine
            .create_card(Position::new(10.0, 10.0), serde_json::Value::Null)
            .await
            .unwrap();
        engine.begin_edit("some-card");

        let count = engine.open_project("p2").await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(engine.active_project().as_deref(), Some("p2"));
        assert!(engine.cards().is_empty());
        // Locks from the old scope are gone.
        assert!(!engine.lock_view("some-card").locked);

        // Old-project traffic arriving after the switch stays out.
        remote
            .create_card(crate::types::CardDraft {
                project_id: "p1".to_string(),
                position: Position::new(2.0, 2.0),
                collapsed: false,
                payload: serde_json::Value::Null,
            })
            .await
            .unwrap();
        settle().await;
        assert!(engine.cards().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_resyncs_missed_changes() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        // A change committed while the feed was down: seed directly so no
        // event is emitted, then announce the reconnect.
        remote.seed(crate::types::Card {
            id: "missed".to_string(),
            project_id: "p1".to_string(),
            position: Position::new(50.0, 50.0),
            collapsed: false,
            payload: serde_json::Value::Null,
            version: 7,
            updated_at: chrono::Utc::now(),
        });
        let feed_tx = remote.feed_sender();
        feed_tx
            .send(crate::feed::types::FeedMessage::Disconnected {
                reason: "socket closed".to_string(),
            })
            .unwrap();
        feed_tx
            .send(crate::feed::types::FeedMessage::Connected)
            .unwrap();
        settle().await;
        assert!(engine.store().get("missed").is_some());
    }

    #[tokio::test]
    async fn test_edit_session_gating() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        let card = engine
            .create_card(Position::new(10.0, 10.0), serde_json::Value::Null)
            .await
            .unwrap();

        // Bob's edit-start arrives through the integration layer.
        let now = chrono::Utc::now();
        engine.observe_lock(Lock {
            card_id: card.id.clone(),
            holder_id: "bob".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(120),
        });

        assert!(!engine.begin_edit(&card.id).granted);
        let view = engine.lock_view(&card.id);
        assert!(view.locked && !view.locked_by_self);
        assert!(view.remaining_ttl_seconds > 0 && view.remaining_ttl_seconds <= 120);

        // Edits and drags are both refused while Bob holds the card.
        let err = engine.set_collapsed(&card.id, true).await.unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));

        // Bob's lock lapses: the card opens up with no release call.
        engine.observe_lock(Lock {
            card_id: card.id.clone(),
            holder_id: "bob".to_string(),
            acquired_at: now - chrono::Duration::seconds(400),
            expires_at: now - chrono::Duration::seconds(100),
        });
        assert!(engine.begin_edit(&card.id).granted);
        assert!(engine.end_edit(&card.id));
    }

    #[tokio::test]
    async fn test_mutation_requires_active_project() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        let err = engine
            .create_card(Position::new(1.0, 1.0), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_refresh_pulls_current_scope() {
        let remote = Arc::new(InMemoryStore::new());
        let engine = make_engine(&remote, "alice");
        engine.open_project("p1").await.unwrap();

        remote.seed(crate::types::Card {
            id: "offline".to_string(),
            project_id: "p1".to_string(),
            position: Position::new(5.0, 5.0),
            collapsed: false,
            payload: serde_json::Value::Null,
            version: 1,
            updated_at: chrono::Utc::now(),
        });
        assert_eq!(engine.refresh().await.unwrap(), 1);
        assert!(engine.store().get("offline").is_some());
    }
}
