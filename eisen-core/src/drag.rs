/// Drag handling: translate pointer pixel deltas into logical moves.
///
/// The container is re-measured on every drag end; a cached scale factor
/// goes stale the moment a responsive layout resizes the container
/// between drags.
use std::sync::Arc;

use crate::coords::{clamp_position, quadrant_of, LogicalBounds, Quadrant, LOGICAL_CANVAS_SIZE};
use crate::lock::{Lock, LockManager};
use crate::optimistic::{MutationError, OptimisticController};
use crate::store::CardStore;
use crate::types::{Card, Position};

/// Pointer movement below this is a click, not a drag.
pub const DRAG_EPSILON_PX: f64 = 0.5;

/// Measured content-box size of the rendered container at drag end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasuredSize {
    pub width: f64,
    pub height: f64,
}

/// Pointer movement between drag start and drag end, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelDelta {
    pub dx: f64,
    pub dy: f64,
}

/// Outcome of a drag-start intent.
#[derive(Debug, Clone, PartialEq)]
pub enum DragStart {
    /// Drag may proceed; the card is locked for this participant.
    Ready { lock: Lock },
    /// Another participant holds an unexpired lock.
    Locked { holder_id: String },
}

/// Outcome of a drag end.
#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    Moved { card: Card, quadrant: Quadrant },
    /// Refused: another participant holds an unexpired lock.
    RefusedLocked { holder_id: String },
    /// Pointer barely moved; no write was issued.
    Ignored,
}

pub struct DragController {
    store: Arc<CardStore>,
    locks: Arc<LockManager>,
    controller: Arc<OptimisticController>,
    participant_id: String,
    bounds: LogicalBounds,
}

impl DragController {
    pub fn new(
        store: Arc<CardStore>,
        locks: Arc<LockManager>,
        controller: Arc<OptimisticController>,
        participant_id: String,
    ) -> Self {
        Self {
            store,
            locks,
            controller,
            participant_id,
            bounds: LogicalBounds::default(),
        }
    }

    /// Gate a drag intent. Acquires (or renews) the card's lock for this
    /// participant; refusal is an explicit outcome, not a silent ignore.
    pub fn begin_drag(&self, card_id: &str) -> Result<DragStart, MutationError> {
        if self.store.get(card_id).is_none() {
            return Err(MutationError::Validation(format!(
                "unknown card: {}",
                card_id
            )));
        }
        let outcome = self.locks.acquire(card_id, &self.participant_id);
        if outcome.granted {
            Ok(DragStart::Ready { lock: outcome.lock })
        } else {
            Ok(DragStart::Locked {
                holder_id: outcome.lock.holder_id,
            })
        }
    }

    /// Apply a finished drag: rescale the pixel delta into logical space
    /// with the freshly measured container size, clamp, and issue a move
    /// mutation.
    pub async fn end_drag(
        &self,
        card_id: &str,
        delta: PixelDelta,
        container: MeasuredSize,
    ) -> Result<DragOutcome, MutationError> {
        if !delta.dx.is_finite() || !delta.dy.is_finite() {
            return Err(MutationError::Validation("drag delta must be finite".into()));
        }
        let card = self
            .store
            .get(card_id)
            .ok_or_else(|| MutationError::Validation(format!("unknown card: {}", card_id)))?;

        let outcome = self.locks.acquire(card_id, &self.participant_id);
        if !outcome.granted {
            return Ok(DragOutcome::RefusedLocked {
                holder_id: outcome.lock.holder_id,
            });
        }

        if delta.dx.abs() < DRAG_EPSILON_PX && delta.dy.abs() < DRAG_EPSILON_PX {
            return Ok(DragOutcome::Ignored);
        }

        // f64::max sends NaN/zero container measurements to the 1px floor.
        let scale_x = LOGICAL_CANVAS_SIZE / container.width.max(1.0);
        let scale_y = LOGICAL_CANVAS_SIZE / container.height.max(1.0);
        let target = Position::new(
            card.position.x + delta.dx * scale_x,
            card.position.y + delta.dy * scale_y,
        );
        let clamped = clamp_position(target, &self.bounds);

        let card = self.controller.move_card(card_id, clamped).await?;
        Ok(DragOutcome::Moved {
            quadrant: quadrant_of(card.position),
            card,
        })
    }
}
