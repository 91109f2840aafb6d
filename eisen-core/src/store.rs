/// In-memory authoritative card collection for the active project set.
///
/// All writes funnel through one RwLock, so mutations are atomic and
/// serialized from the engine's point of view. Subscribers are an explicit
/// observer list: every committed change (local optimistic or merged
/// remote) is delivered synchronously after the write lock is released.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::coords::{clamp_position, LogicalBounds};
use crate::types::Card;

/// A committed change to the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Upserted { card: Card },
    Removed { card_id: String, project_id: String },
    ScopeReplaced { project_id: String },
}

type Listener = Box<dyn Fn(&StoreEvent) + Send + Sync>;

/// Handle returned by [`CardStore::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct CardStore {
    /// card id -> card
    cards: RwLock<HashMap<String, Card>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
    bounds: LogicalBounds,
}

impl Default for CardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CardStore {
    pub fn new() -> Self {
        Self {
            cards: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            bounds: LogicalBounds::default(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Card> {
        self.cards.read().unwrap().get(id).cloned()
    }

    /// All cards of a project, ordered by id for deterministic iteration.
    pub fn list(&self, project_id: &str) -> Vec<Card> {
        let mut cards: Vec<Card> = self
            .cards
            .read()
            .unwrap()
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        cards
    }

    /// Insert or replace a card. The position is clamped to logical bounds
    /// before it is stored, so no operation can commit an out-of-bounds
    /// coordinate.
    ///
    /// Returns whether observable state changed. Re-applying an identical
    /// card is a no-op and emits no event, which is what makes own-write
    /// echoes from the change feed idempotent.
    pub fn upsert(&self, mut card: Card) -> bool {
        card.position = clamp_position(card.position, &self.bounds);
        {
            let mut cards = self.cards.write().unwrap();
            if cards.get(&card.id) == Some(&card) {
                return false;
            }
            cards.insert(card.id.clone(), card.clone());
        }
        self.notify(&StoreEvent::Upserted { card });
        true
    }

    /// Remove a card, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<Card> {
        let removed = self.cards.write().unwrap().remove(id);
        if let Some(card) = &removed {
            self.notify(&StoreEvent::Removed {
                card_id: card.id.clone(),
                project_id: card.project_id.clone(),
            });
        }
        removed
    }

    /// Replace the whole working set of one project in a single step.
    /// Used for feed resyncs and project switches; cards belonging to
    /// other projects are untouched. Returns the new scope size.
    pub fn replace_project(&self, project_id: &str, cards: Vec<Card>) -> usize {
        let count;
        {
            let mut map = self.cards.write().unwrap();
            map.retain(|_, c| c.project_id != project_id);
            count = cards
                .into_iter()
                .filter(|c| c.project_id == project_id)
                .map(|mut c| {
                    c.position = clamp_position(c.position, &self.bounds);
                    map.insert(c.id.clone(), c);
                })
                .count();
        }
        self.notify(&StoreEvent::ScopeReplaced {
            project_id: project_id.to_string(),
        });
        count
    }

    /// Register a listener for committed changes.
    ///
    /// Listeners run synchronously on the mutating thread and must not
    /// subscribe or unsubscribe from inside the callback.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap()
            .push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    fn notify(&self, event: &StoreEvent) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(event);
        }
    }
}
