/// In-memory durable store with a table-wide broadcast change feed.
///
/// Backs tests and single-process use. Mirrors the contract a real
/// backend provides: server-assigned ids, a monotonic version counter,
/// commit timestamps, and one feed event per committed change. Failures
/// can be scripted to exercise rollback paths.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{DurableStore, RemoteError};
use crate::coords::{clamp_position, LogicalBounds};
use crate::feed::types::{ChangeEvent, ChangeFeed, ChangeKind, FeedMessage};
use crate::types::{Card, CardDraft, CardPatch};

pub struct InMemoryStore {
    /// card id -> card
    cards: RwLock<HashMap<String, Card>>,
    /// Monotonic version counter shared across all cards.
    next_version: AtomicU64,
    feed_tx: broadcast::Sender<FeedMessage>,
    /// Scripted failures, consumed one per operation.
    failures: Mutex<VecDeque<RemoteError>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(256);
        Self {
            cards: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            feed_tx,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Clone of the feed sender, for injecting connection lifecycle
    /// messages or simulating other clients.
    pub fn feed_sender(&self) -> broadcast::Sender<FeedMessage> {
        self.feed_tx.clone()
    }

    /// Queue a failure; the next store operation consumes and returns it.
    pub fn fail_next(&self, err: RemoteError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Insert a card directly, without a feed event. Test setup only.
    pub fn seed(&self, card: Card) {
        self.cards.write().unwrap().insert(card.id.clone(), card);
    }

    pub fn card_count(&self) -> usize {
        self.cards.read().unwrap().len()
    }

    fn take_failure(&self) -> Result<(), RemoteError> {
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, kind: ChangeKind, entity: Card) {
        let event = ChangeEvent {
            kind,
            project_id: entity.project_id.clone(),
            server_ts: Utc::now(),
            entity,
        };
        // No receivers is fine; the feed is fire-and-forget.
        let _ = self.feed_tx.send(FeedMessage::Change { event });
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn create_card(&self, draft: CardDraft) -> Result<Card, RemoteError> {
        self.take_failure()?;
        let card = Card {
            id: format!("card-{}", Uuid::new_v4()),
            project_id: draft.project_id,
            position: clamp_position(draft.position, &LogicalBounds::default()),
            collapsed: draft.collapsed,
            payload: draft.payload,
            version: self.next_version(),
            updated_at: Utc::now(),
        };
        self.cards
            .write()
            .unwrap()
            .insert(card.id.clone(), card.clone());
        self.emit(ChangeKind::Insert, card.clone());
        Ok(card)
    }

    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<Card, RemoteError> {
        self.take_failure()?;
        let updated = {
            let mut cards = self.cards.write().unwrap();
            let card = cards
                .get_mut(id)
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            card.apply_patch(&patch);
            card.position = clamp_position(card.position, &LogicalBounds::default());
            card.version = self.next_version();
            card.updated_at = Utc::now();
            card.clone()
        };
        self.emit(ChangeKind::Update, updated.clone());
        Ok(updated)
    }

    async fn delete_card(&self, id: &str) -> Result<(), RemoteError> {
        self.take_failure()?;
        let removed = self
            .cards
            .write()
            .unwrap()
            .remove(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        self.emit(ChangeKind::Delete, removed);
        Ok(())
    }

    async fn cards_by_project(&self, project_id: &str) -> Result<Vec<Card>, RemoteError> {
        self.take_failure()?;
        let mut cards: Vec<Card> = self
            .cards
            .read()
            .unwrap()
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(cards)
    }
}

impl ChangeFeed for InMemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.feed_tx.subscribe()
    }
}
