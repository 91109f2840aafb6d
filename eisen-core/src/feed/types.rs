/// Change-feed message types.
///
/// The feed covers the whole card table: subscriptions take no filter
/// parameters, so a subscription can never depend on an authorization
/// check against the table it watches. Project filtering is client-side,
/// in the merger.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::Card;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed change to the card table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub entity: Card,
    /// Scope tag, present on every event so clients can filter without
    /// asking the server to.
    pub project_id: String,
    /// Commit time assigned by the durable store.
    pub server_ts: DateTime<Utc>,
}

/// Messages delivered on a feed subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FeedMessage {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    Change { event: ChangeEvent },
}

/// A source of change-feed messages for the card table as a whole.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to the raw feed. Each receiver sees every message from
    /// the moment of subscription; a lagged receiver must resync.
    fn subscribe(&self) -> broadcast::Receiver<FeedMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn make_event() -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Update,
            entity: Card {
                id: "c1".to_string(),
                project_id: "p1".to_string(),
                position: Position::new(10.0, 20.0),
                collapsed: false,
                payload: serde_json::Value::Null,
                version: 2,
                updated_at: Utc::now(),
            },
            project_id: "p1".to_string(),
            server_ts: Utc::now(),
        }
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(make_event()).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["projectId"], "p1");
        assert!(json.get("serverTs").is_some());
    }

    #[test]
    fn test_feed_message_tagging() {
        let json = serde_json::to_value(FeedMessage::Disconnected {
            reason: "socket closed".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "disconnected");

        let change = serde_json::to_value(FeedMessage::Change {
            event: make_event(),
        })
        .unwrap();
        assert_eq!(change["kind"], "change");
        assert_eq!(change["event"]["type"], "update");
    }
}
