//! Data types for the state synchronization layer
//!
//! This module contains the shared state document, partial updates, and the
//! events that carry snapshots to subscribers.

mod event;
mod state;

pub use event::{EventKind, StateEvent};
pub use state::{ExtensionMap, Revision, SharedState, StatePatch};
