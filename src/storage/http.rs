use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use tracing::{info, warn};

use super::{object_path, ObjectStorage};
use crate::model::ResourceKind;

/// Bucket reachable over plain HTTP: `PUT` writes an object, `HEAD` checks it,
/// and the object URL itself is the download URL.
#[derive(Clone)]
pub struct HttpStorage {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for HttpStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStorage")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpStorage {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid storage base URL")?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("storage base URL cannot be a base: {}", base_url));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("storymap/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// `<base>/<kind>/<id>` with the id percent-encoded as a single segment.
    pub fn object_url(&self, kind: ResourceKind, id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("storage base URL cannot be a base"))?
            .pop_if_empty()
            .push(kind.collection())
            .push(id);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    pub fn build_upload_request(
        &self,
        kind: ResourceKind,
        id: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<reqwest::Request> {
        let url = self.object_url(kind, id)?;
        self.authorize(self.http.put(url))
            .header("Content-Type", content_type)
            .body(bytes)
            .build()
            .context("failed to build upload request")
    }
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    async fn upload(
        &self,
        kind: ResourceKind,
        id: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size = bytes.len();
        let request = self.build_upload_request(kind, id, bytes, content_type)?;
        info!(url = %request.url(), size, "uploading image");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach object storage")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by object storage: {}", body);
            return Err(anyhow!("received 429 from object storage: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "object storage rejected upload of {}", object_path(kind, id));
            return Err(anyhow!("upload failed {}: {}", status, body));
        }
        info!("image uploaded to {}", object_path(kind, id));
        Ok(())
    }

    async fn download_url(&self, kind: ResourceKind, id: &str) -> Result<String> {
        let url = self.object_url(kind, id)?;
        let res = self
            .authorize(self.http.head(url.clone()))
            .send()
            .await
            .context("failed to reach object storage")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "object {} not available: {}",
                object_path(kind, id),
                res.status()
            ));
        }
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_joins_kind_and_escaped_id() {
        let storage = HttpStorage::new("https://cdn.example/bucket", None).unwrap();
        let url = storage
            .object_url(ResourceKind::Location, "Eiffel Tower")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://cdn.example/bucket/locations/Eiffel%20Tower"
        );

        let storage = HttpStorage::new("https://cdn.example/", None).unwrap();
        let url = storage.object_url(ResourceKind::Story, "s/1").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example/stories/s%2F1");
    }

    #[test]
    fn upload_request_sets_headers() {
        let storage =
            HttpStorage::new("https://cdn.example/bucket/", Some("secret".into())).unwrap();
        let request = storage
            .build_upload_request(ResourceKind::Story, "abc", b"img".to_vec(), "image/png")
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::PUT);
        assert_eq!(request.url().path(), "/bucket/stories/abc");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer secret"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "image/png"
        );
    }

    #[test]
    fn blank_token_sends_no_authorization() {
        let storage = HttpStorage::new("https://cdn.example", Some("  ".into())).unwrap();
        let request = storage
            .build_upload_request(ResourceKind::Location, "x", vec![], "image/jpeg")
            .unwrap();
        assert!(request.headers().get("Authorization").is_none());
    }
}
