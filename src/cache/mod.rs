//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named namespaces, each with exactly one current generation
//! - Install/activate lifecycle with garbage collection of stale generations
//! - The cache-first, network-first and stale-while-revalidate strategies
//! - SQLite persistence of cached responses

mod generations;
mod identity;
mod layer;
mod served;
mod storage;

pub use generations::{GenerationManager, InstallPolicy, InstallReport};
pub use identity::{normalize_url, RequestIdentity};
pub use layer::CacheLayer;
pub use served::{ResponseSource, Served};
pub use storage::{CacheStorage, CachedResponse, GenerationInfo, SqliteStorage};
