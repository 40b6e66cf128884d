//! # untold-store
//!
//! Persistence layer for the Untold story-sharing backend, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model:
//! stories, reactions (likes / dislikes), reports, comments, users, and
//! bookmarks.  Every mutating operation runs as a single transaction so the
//! database itself is the synchronization boundary; callers wanting
//! concurrent access share one handle behind a mutex.

pub mod database;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod stories;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
