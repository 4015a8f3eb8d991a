//! SQLite persistence: the document store backing both collections and the
//! attachment retry outbox.
//!
//! External modules should import from `storymap::db`; the repository API is
//! re-exported here.

pub mod repo;

pub use repo::*;
