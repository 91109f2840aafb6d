use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in logical canvas coordinates.
///
/// Logical coordinates are independent of the rendered container size;
/// they only change when a card is moved, never when the viewport resizes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The positionable unit of the matrix.
///
/// Everything outside `position` and `collapsed` is opaque to the engine:
/// content, priority, owner and friends travel inside `payload` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub project_id: String,
    pub position: Position,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    /// Server-side revision counter, used for staleness comparison on merge.
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Apply a partial update in place. Fields absent from the patch keep
    /// their current value.
    pub fn apply_patch(&mut self, patch: &CardPatch) {
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(collapsed) = patch.collapsed {
            self.collapsed = collapsed;
        }
        if let Some(payload) = &patch.payload {
            self.payload = payload.clone();
        }
    }
}

/// Payload for creating a card. The durable store assigns id, version and
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDraft {
    pub project_id: String,
    pub position: Position,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Partial update for an existing card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CardPatch {
    pub fn move_to(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn set_collapsed(collapsed: bool) -> Self {
        Self {
            collapsed: Some(collapsed),
            ..Self::default()
        }
    }

    pub fn set_payload(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.collapsed.is_none() && self.payload.is_none()
    }
}
