//! The shared relational database all nodes coordinate through.
//!
//! Event rows carry the cut-and-upload job state machine; the nodes
//! table advertises peers for backfill. All cross-node coordination is
//! optimistic: single atomic UPDATEs with state preconditions, the
//! database as arbiter.

pub mod db;
pub mod event;
pub mod store;

pub use db::{DbError, create_pool};
pub use event::{Crop, Event, EventState, ThumbnailMode, TimeRange, Transition};
pub use sqlx::types::Json;
pub use store::{EventStore, Node};
