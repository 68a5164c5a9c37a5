//! Versioned execution-state snapshot persistence (spec §4.3, §6).

pub mod error;
pub mod snapshot;
pub mod store;

pub use error::{CheckpointError, Result};
pub use snapshot::{Snapshot, CURRENT_VERSION};
pub use store::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
