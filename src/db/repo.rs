use crate::model::{OutboxKind, OutboxState, OutboxTask};
use crate::store::{Document, DocumentStore, Fields};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and request creation of the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// `DocumentStore` over a single `documents` table holding JSON bodies.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: Pool,
}

impl SqliteDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let id: String = row.get("id");
    let body: String = row.get("body");
    let fields = match serde_json::from_str::<Value>(&body)
        .with_context(|| format!("document {} holds invalid JSON", id))?
    {
        Value::Object(map) => map,
        other => return Err(anyhow!("document {} is not an object: {}", id, other)),
    };
    Ok(Document {
        id,
        fields,
        created_at: row.get("created_at"),
    })
}

/// JSON path for a top-level field, quoted so names with dots stay intact.
fn field_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    #[instrument(skip_all, fields(collection = %collection))]
    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(&id)
        .bind(Value::Object(fields).to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to add document to {}", collection))?;
        Ok(id)
    }

    #[instrument(skip_all, fields(collection = %collection, id = %id))]
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(collection)
        .bind(id)
        .bind(Value::Object(fields).to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to set document {}/{}", collection, id))?;
        Ok(())
    }

    #[instrument(skip_all, fields(collection = %collection, id = %id))]
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE documents SET body = json_patch(body, ?), updated_at = ? WHERE collection = ? AND id = ?",
        )
        .bind(Value::Object(fields).to_string())
        .bind(Utc::now())
        .bind(collection)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update document {}/{}", collection, id))?;
        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(collection = %collection, id = %id))]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, body, created_at FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, body, created_at FROM documents WHERE collection = ? ORDER BY rowid ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    #[instrument(skip_all, fields(collection = %collection, field = %field))]
    async fn find_eq(&self, collection: &str, field: &str, value: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, body, created_at FROM documents \
             WHERE collection = ? AND json_type(body, ?) = 'text' AND json_extract(body, ?) = ? \
             ORDER BY rowid ASC",
        )
        .bind(collection)
        .bind(field_path(field))
        .bind(field_path(field))
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }
}

fn row_to_task(row: &SqliteRow) -> Result<OutboxTask> {
    let id: i64 = row.get("id");
    let kind: String = row.get("kind");
    let kind = OutboxKind::parse_kind(&kind)
        .ok_or_else(|| anyhow!("outbox task {} has unknown kind {}", id, kind))?;
    Ok(OutboxTask {
        id,
        kind,
        ref_id: row.get("ref_id"),
        image_path: row.get("image_path"),
        attempt: row.get("attempt"),
        due_at: row.get("due_at"),
        last_error: row.try_get::<Option<String>, _>("last_error").ok().flatten(),
    })
}

#[instrument(skip_all)]
pub async fn enqueue_outbox(
    pool: &Pool,
    kind: OutboxKind,
    ref_id: &str,
    image_path: &str,
    last_error: Option<&str>,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO outbox (kind, ref_id, image_path, attempt, due_at, state, last_error) VALUES (?, ?, ?, 0, ?, ?, ?) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(ref_id)
    .bind(image_path)
    .bind(due_at)
    .bind(OutboxState::Queued.as_str())
    .bind(last_error)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_outbox(pool: &Pool) -> Result<Option<OutboxTask>> {
    let row = sqlx::query(
        "SELECT id, kind, ref_id, image_path, attempt, due_at, last_error FROM outbox \
         WHERE state = 'queued' AND datetime(due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_task).transpose()
}

#[instrument(skip_all)]
pub async fn list_outbox(pool: &Pool, state: OutboxState) -> Result<Vec<OutboxTask>> {
    let rows = sqlx::query(
        "SELECT id, kind, ref_id, image_path, attempt, due_at, last_error FROM outbox \
         WHERE state = ? ORDER BY id ASC",
    )
    .bind(state.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_task).collect()
}

#[instrument(skip_all)]
pub async fn delete_outbox(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Backoff delay for the given attempt: `5s * 2^attempt`, capped at `max_cap_secs`
/// (a non-positive cap falls back to one hour).
pub fn backoff_delay_secs(attempt: i32, max_cap_secs: i64) -> i64 {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let cap = if max_cap_secs <= 0 { 3600 } else { max_cap_secs };
    secs.min(cap)
}

#[instrument(skip_all)]
pub async fn backoff_outbox_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
    error: &str,
) -> Result<()> {
    let due_at = Utc::now() + Duration::seconds(backoff_delay_secs(attempt, max_cap_secs));
    sqlx::query("UPDATE outbox SET attempt = ?, due_at = ?, last_error = ? WHERE id = ?")
        .bind(attempt + 1)
        .bind(due_at)
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn abandon_outbox(pool: &Pool, id: i64, attempt: i32, error: &str) -> Result<()> {
    sqlx::query("UPDATE outbox SET attempt = ?, state = ?, last_error = ? WHERE id = ?")
        .bind(attempt + 1)
        .bind(OutboxState::Abandoned.as_str())
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_queued_outbox(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE state = 'queued'")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn fields(v: Value) -> Fields {
        match v {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn add_get_update_list() {
        let store = SqliteDocumentStore::new(setup_pool().await);
        let a = store
            .add("locations", fields(json!({"title": "Tower", "latitude": 1.0})))
            .await
            .unwrap();
        let b = store
            .add("locations", fields(json!({"title": "Bridge"})))
            .await
            .unwrap();
        assert_ne!(a, b);

        assert!(store
            .update("locations", &a, fields(json!({"image": "u1"})))
            .await
            .unwrap());
        assert!(store
            .update("locations", &a, fields(json!({"image": "u2"})))
            .await
            .unwrap());
        let doc = store.get("locations", &a).await.unwrap().unwrap();
        assert_eq!(doc.fields["image"], "u2");
        assert_eq!(doc.fields["title"], "Tower");

        let ids: Vec<String> = store
            .list("locations")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![a, b]);
        assert!(store.list("stories").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_missing_returns_false() {
        let store = SqliteDocumentStore::new(setup_pool().await);
        let updated = store
            .update("locations", "nope", fields(json!({"image": "x"})))
            .await
            .unwrap();
        assert!(!updated);
        assert!(store.get("locations", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_keeping_position() {
        let store = SqliteDocumentStore::new(setup_pool().await);
        store
            .set("locations", "Tower", fields(json!({"description": "old"})))
            .await
            .unwrap();
        store
            .set("locations", "Bridge", fields(json!({"description": "b"})))
            .await
            .unwrap();
        store
            .set("locations", "Tower", fields(json!({"description": "new"})))
            .await
            .unwrap();
        let docs = store.list("locations").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "Tower");
        assert_eq!(docs[0].fields["description"], "new");
    }

    #[tokio::test]
    async fn find_eq_is_exact_and_case_sensitive() {
        let store = SqliteDocumentStore::new(setup_pool().await);
        for loc in ["Paris", "paris", "Paris, TX", "Paris"] {
            store
                .add("stories", fields(json!({"location": loc})))
                .await
                .unwrap();
        }
        store
            .add("stories", fields(json!({"location": 7})))
            .await
            .unwrap();
        let found = store.find_eq("stories", "location", "Paris").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.fields["location"] == "Paris"));
        assert!(store
            .find_eq("stories", "location", "7")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn outbox_backoff_and_abandon() {
        let pool = setup_pool().await;
        let id = enqueue_outbox(
            &pool,
            OutboxKind::AttachStoryImage,
            "story-1",
            "/tmp/a.jpg",
            None,
            Utc::now() - Duration::seconds(1),
        )
        .await
        .unwrap();

        let task = next_due_outbox(&pool).await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.kind, OutboxKind::AttachStoryImage);
        assert_eq!(task.attempt, 0);

        backoff_outbox_with_cap(&pool, id, task.attempt, 60, "boom")
            .await
            .unwrap();
        assert!(next_due_outbox(&pool).await.unwrap().is_none());
        assert_eq!(count_queued_outbox(&pool).await.unwrap(), 1);

        abandon_outbox(&pool, id, 1, "still broken").await.unwrap();
        assert_eq!(count_queued_outbox(&pool).await.unwrap(), 0);
        let abandoned = list_outbox(&pool, OutboxState::Abandoned).await.unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].attempt, 2);
        assert_eq!(abandoned[0].last_error.as_deref(), Some("still broken"));
    }

    #[test]
    fn backoff_delay_caps() {
        assert_eq!(backoff_delay_secs(0, 60), 5);
        assert_eq!(backoff_delay_secs(2, 60), 20);
        assert_eq!(backoff_delay_secs(5, 60), 60);
        assert_eq!(backoff_delay_secs(30, 0), 3600);
    }

    #[test]
    fn prepare_url_variants() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("sqlite:///tmp/storymap-test/x.db"),
            "sqlite:///tmp/storymap-test/x.db?mode=rwc"
        );
        assert_eq!(
            prepare_sqlite_url("sqlite:/tmp/storymap-test/x.db?mode=ro"),
            "sqlite:///tmp/storymap-test/x.db?mode=ro"
        );
    }
}
