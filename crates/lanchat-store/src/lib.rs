//! # lanchat-store
//!
//! Small key-value persistence used for the device's local identity.
//!
//! The crate exposes the [`KeyValueStore`] trait with two backends: a
//! SQLite-backed [`Database`] placed in the platform data directory, and an
//! in-process [`MemoryStore`] used when no durable storage is available.

pub mod database;
pub mod kv;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, KeyValueStoreExt, MemoryStore};
