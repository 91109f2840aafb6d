pub mod memory;

use async_trait::async_trait;

use crate::types::{Card, CardDraft, CardPatch};

/// Abstract durable-store contract for card persistence.
/// Implementations: InMemoryStore (tests, single process), future: any
/// backend that can do CRUD plus a table-wide change feed.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create a card. The store assigns id, version and timestamps and
    /// returns the canonical entity.
    async fn create_card(&self, draft: CardDraft) -> Result<Card, RemoteError>;

    /// Apply a partial update and return the canonical entity.
    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<Card, RemoteError>;

    /// Delete a card.
    async fn delete_card(&self, id: &str) -> Result<(), RemoteError>;

    /// Fetch the full current card set of one project (used for resync).
    async fn cards_by_project(&self, project_id: &str) -> Result<Vec<Card>, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Card not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),
}

impl RemoteError {
    /// Whether the caller may resubmit the same mutation. Timeouts and
    /// transport drops are retryable; rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Timeout(_))
    }
}
