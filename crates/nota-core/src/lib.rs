//! nota-core - Core library for Nota
//!
//! This crate contains the shared models, the local replica store with its
//! mutation queue, and the offline-sync logic (conflict resolution, sync
//! engine, realtime listener) used by all Nota clients.

pub mod db;
pub mod error;
pub mod models;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Note, NoteId};
