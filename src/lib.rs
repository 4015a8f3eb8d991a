pub mod attach;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod locations;
pub mod model;
pub mod outbox;
pub mod storage;
pub mod store;
pub mod stories;
pub mod tracker;

pub use error::{Error, Result, ValidationError};
