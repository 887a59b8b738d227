//! Durable write-ahead queue for deferred actions and state snapshots.

mod store;
mod types;

pub use store::QueueStore;
pub use types::{generate_id, ItemKind, NewItem, QueueItem, ReplayTarget};
