//! Offline-first request cache, durable action queue and sync agent.
//!
//! [`worker::OfflineWorker`] is the entry point: it answers intercepted
//! requests from versioned cache generations, keeps application state and
//! deferred actions in a SQLite-backed queue, replays them when a sync is
//! triggered, and reports back to every connected view.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod event;
pub mod messages;
pub mod net;
pub mod queue;
pub mod sync;
pub mod worker;
