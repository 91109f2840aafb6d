/// Merges the remote change stream into the local card store.
///
/// The feed covers the whole card table, so the merger filters by the
/// active project first, then reconciles each event against pending
/// local optimistic mutations. A bad event is logged and dropped; one
/// malformed message must never stop the stream behind it.
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::feed::types::{ChangeEvent, ChangeKind, FeedMessage};
use crate::optimistic::OptimisticController;
use crate::remote::{DurableStore, RemoteError};
use crate::store::CardStore;

/// What happened to one feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDisposition {
    Applied,
    /// Tagged with a project other than the active one.
    ForeignProject,
    /// Lost against local state: a pending optimistic mutation was issued
    /// after the event's commit time, or the stored entity already
    /// carries a newer version.
    Stale,
    /// Failed sanity checks; dropped.
    Malformed,
}

pub struct ChangeFeedMerger {
    store: Arc<CardStore>,
    controller: Arc<OptimisticController>,
    remote: Arc<dyn DurableStore>,
    project_id: String,
}

impl ChangeFeedMerger {
    pub fn new(
        store: Arc<CardStore>,
        controller: Arc<OptimisticController>,
        remote: Arc<dyn DurableStore>,
        project_id: String,
    ) -> Self {
        Self {
            store,
            controller,
            remote,
            project_id,
        }
    }

    /// Merge a single change event into the store.
    pub fn apply_event(&self, event: &ChangeEvent) -> MergeDisposition {
        if event.entity.id.is_empty()
            || event.project_id.is_empty()
            || event.entity.project_id != event.project_id
        {
            log::warn!(
                "[eisen.merge.drop] Malformed change event for {:?}",
                event.entity.id
            );
            return MergeDisposition::Malformed;
        }
        if event.project_id != self.project_id {
            return MergeDisposition::ForeignProject;
        }

        // A local mutation issued after this event's commit wins until its
        // own round trip resolves.
        if self
            .controller
            .pending_issued_after(&event.entity.id, event.server_ts)
        {
            log::debug!(
                "[eisen.merge.skip] Event for {} older than pending local mutation",
                event.entity.id
            );
            return MergeDisposition::Stale;
        }

        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                if let Some(existing) = self.store.get(&event.entity.id) {
                    if existing.version > event.entity.version {
                        log::debug!(
                            "[eisen.merge.skip] Event for {} carries version {} behind stored {}",
                            event.entity.id,
                            event.entity.version,
                            existing.version
                        );
                        return MergeDisposition::Stale;
                    }
                }
                // Idempotent: re-applying an identical card (our own
                // write echoed back) changes nothing and emits nothing.
                self.store.upsert(event.entity.clone());
            }
            ChangeKind::Delete => {
                self.store.remove(&event.entity.id);
            }
        }
        MergeDisposition::Applied
    }

    /// Fetch the project's full card set and replace the local scope.
    /// Used on connect and after any feed gap; the gap is never assumed
    /// to have been empty.
    pub async fn resync(&self) -> Result<usize, RemoteError> {
        let cards = self.remote.cards_by_project(&self.project_id).await?;
        let count = self.store.replace_project(&self.project_id, cards);
        log::info!(
            "[eisen.feed.resync] Scope {} replaced with {} cards",
            self.project_id,
            count
        );
        Ok(count)
    }

    /// Consume the feed until shutdown. Connection gaps (disconnect or a
    /// lagged receiver) trigger a resync rather than silent staleness.
    pub async fn run(
        self: Arc<Self>,
        mut feed_rx: broadcast::Receiver<FeedMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                msg = feed_rx.recv() => match msg {
                    Ok(FeedMessage::Connected) => {
                        if let Err(e) = self.resync().await {
                            log::warn!(
                                "[eisen.feed.resync] Resync of {} failed: {}",
                                self.project_id,
                                e
                            );
                        }
                    }
                    Ok(FeedMessage::Disconnected { reason }) => {
                        log::warn!(
                            target: "eisen.feed",
                            "Feed disconnected ({}); awaiting reconnect for resync",
                            reason
                        );
                    }
                    Ok(FeedMessage::Error { message }) => {
                        log::warn!(target: "eisen.feed", "Feed error: {}", message);
                    }
                    Ok(FeedMessage::Change { event }) => {
                        self.apply_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!(
                            "[eisen.feed.lag] Dropped {} feed messages, resyncing",
                            missed
                        );
                        if let Err(e) = self.resync().await {
                            log::warn!(
                                "[eisen.feed.resync] Resync of {} failed: {}",
                                self.project_id,
                                e
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::info!(target: "eisen.feed", "Feed closed, stopping merger");
                        break;
                    }
                }
            }
        }
    }
}
