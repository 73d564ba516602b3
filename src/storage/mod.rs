pub mod snapshot;

pub use snapshot::{IndexSnapshot, SnapshotStore};
