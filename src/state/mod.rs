//! Durable local state for the player.
//!
//! A small SQLite-backed key-value store holding device identity, the auth
//! token, the last playlist snapshot, per-content cache records, the sync
//! summary, server-pushed settings and the offline action queue. Values are
//! JSON documents; each key has a single writer and every write goes through
//! the store's connection mutex.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SnapshotDiff, SqliteStateStore, StateStore};
pub use error::StateError;
pub use types::{CachedContent, Device, OfflineAction, OfflineActionKind, SyncState};
