//! Document store seam: schema-less JSON documents grouped into collections.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;

pub type Fields = Map<String, Value>;

/// A stored document as read back from a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + Any {
    /// Insert with a generated id and return it.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String>;

    /// Create or overwrite the document stored under `id`.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    /// Merge `fields` into an existing document. Returns `false` if it does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<bool>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Every document in insertion order.
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// Documents whose string `field` equals `value` exactly.
    async fn find_eq(&self, collection: &str, field: &str, value: &str) -> Result<Vec<Document>>;
}

/// Serialize a record struct into document fields.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, got {}", other)),
    }
}
