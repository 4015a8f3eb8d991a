//! Object storage seam for uploaded images.
//!
//! Objects are keyed by resource kind plus the owning record's id
//! (`/locations/<id>`, `/stories/<id>`). After an upload completes,
//! `download_url` resolves the URL that gets patched onto the record.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::any::Any;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::model::ResourceKind;

pub mod http;

pub use http::HttpStorage;

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9-]").expect("valid file name regex"));

#[async_trait]
pub trait ObjectStorage: Send + Sync + Any {
    async fn upload(
        &self,
        kind: ResourceKind,
        id: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn download_url(&self, kind: ResourceKind, id: &str) -> Result<String>;
}

/// Logical object path, e.g. `/stories/abc`.
pub fn object_path(kind: ResourceKind, id: &str) -> String {
    format!("{}{}", kind.storage_prefix(), id)
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// File name for a record id. Every byte outside `[A-Za-z0-9-]` becomes `_XX`
/// (uppercase hex), so distinct ids never share a file and `.`/`..` cannot escape.
pub fn encode_file_name(id: &str) -> String {
    UNSAFE_FILE_CHARS
        .replace_all(id, |caps: &Captures| {
            caps[0]
                .bytes()
                .map(|b| format!("_{:02X}", b))
                .collect::<String>()
        })
        .into_owned()
}

/// Build the storage backend selected in the configuration.
pub fn from_config(cfg: &Config) -> Result<Box<dyn ObjectStorage>> {
    match cfg.storage.backend {
        StorageBackend::Local => Ok(Box::new(LocalStorage::new(
            Path::new(&cfg.app.resolved_data_dir()).join("media"),
        ))),
        StorageBackend::Http => {
            let base = cfg
                .storage
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow!("storage.base_url is required for the http backend"))?;
            Ok(Box::new(HttpStorage::new(base, cfg.storage.token.clone())?))
        }
    }
}

/// Stores objects as files under `root/<kind>/<id>`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_file(&self, kind: ResourceKind, id: &str) -> PathBuf {
        self.root.join(kind.collection()).join(encode_file_name(id))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn upload(
        &self,
        kind: ResourceKind,
        id: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        let file = self.object_file(kind, id);
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create media dir: {}", dir.display()))?;
        }
        fs::write(&file, &bytes)
            .await
            .with_context(|| format!("failed to write object: {}", file.display()))?;
        info!(path = %object_path(kind, id), bytes = bytes.len(), "stored image locally");
        Ok(())
    }

    async fn download_url(&self, kind: ResourceKind, id: &str) -> Result<String> {
        let file = self.object_file(kind, id);
        if !fs::try_exists(&file).await.unwrap_or(false) {
            return Err(anyhow!("object {} does not exist", object_path(kind, id)));
        }
        let absolute = fs::canonicalize(&file)
            .await
            .with_context(|| format!("failed to resolve {}", file.display()))?;
        Ok(format!("file://{}", absolute.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn object_path_uses_kind_prefix() {
        assert_eq!(object_path(ResourceKind::Location, "abc"), "/locations/abc");
        assert_eq!(object_path(ResourceKind::Story, "s1"), "/stories/s1");
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn file_names_are_distinct_per_id() {
        assert_eq!(encode_file_name("abc-123"), "abc-123");
        assert_eq!(encode_file_name("Eiffel Tower"), "Eiffel_20Tower");
        assert_eq!(encode_file_name("Eiffel_Tower"), "Eiffel_5FTower");
        assert_eq!(encode_file_name(".."), "_2E_2E");
        assert_eq!(encode_file_name("Café"), "Caf_C3_A9");
    }

    #[tokio::test]
    async fn similar_ids_keep_separate_objects() {
        let td = tempdir().unwrap();
        let storage = LocalStorage::new(td.path());
        storage
            .upload(ResourceKind::Location, "Eiffel Tower", b"A".to_vec(), "image/jpeg")
            .await
            .unwrap();
        storage
            .upload(ResourceKind::Location, "Eiffel_Tower", b"B".to_vec(), "image/jpeg")
            .await
            .unwrap();

        let first = storage.object_file(ResourceKind::Location, "Eiffel Tower");
        let second = storage.object_file(ResourceKind::Location, "Eiffel_Tower");
        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"A");
        assert_eq!(std::fs::read(&second).unwrap(), b"B");

        let url_a = storage
            .download_url(ResourceKind::Location, "Eiffel Tower")
            .await
            .unwrap();
        let url_b = storage
            .download_url(ResourceKind::Location, "Eiffel_Tower")
            .await
            .unwrap();
        assert_ne!(url_a, url_b);
    }

    #[tokio::test]
    async fn local_upload_then_url() {
        let td = tempdir().unwrap();
        let storage = LocalStorage::new(td.path());
        assert!(storage
            .download_url(ResourceKind::Location, "Eiffel Tower")
            .await
            .is_err());

        storage
            .upload(ResourceKind::Location, "Eiffel Tower", b"jpeg".to_vec(), "image/jpeg")
            .await
            .unwrap();
        let file = storage.object_file(ResourceKind::Location, "Eiffel Tower");
        assert!(file.ends_with("locations/Eiffel_20Tower"));
        assert_eq!(std::fs::read(&file).unwrap(), b"jpeg");

        let url = storage
            .download_url(ResourceKind::Location, "Eiffel Tower")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("Eiffel_20Tower"));
    }
}
