//! Eisen core: positioning and synchronization engine for a collaborative
//! four-quadrant priority matrix.
//!
//! Cards live on a fixed 520×520 logical canvas and are projected into
//! whatever container the caller renders. The engine owns coordinate
//! mapping and quadrant classification, drag-delta scaling, optimistic
//! mutation with rollback, soft edit locks, and merging of the remote
//! change feed. Rendering, auth and the actual persistence backend stay
//! outside; the engine binds to the [`remote::DurableStore`] and
//! [`feed::types::ChangeFeed`] traits only.

pub mod config;
pub mod coords;
pub mod drag;
pub mod engine;
pub mod feed;
pub mod lock;
pub mod optimistic;
pub mod remote;
pub mod store;
pub mod types;
pub mod zorder;

pub use config::{EngineConfig, ParticipantIdentity};
pub use engine::MatrixEngine;
pub use types::{Card, CardDraft, CardPatch, Position};
