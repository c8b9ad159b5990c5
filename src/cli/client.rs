//! Thin reqwest wrapper over the store's HTTP routes.

use crate::models::{
    bucket::Bucket,
    object::{ObjectMetadata, content_type_for},
};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::{Body, Response, Url, header};
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers returned by `HEAD /objects/{bucket}/{key}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStat {
    pub content_type: String,
    pub content_length: String,
    pub etag: String,
    pub last_modified: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: Url,
}

impl StoreClient {
    pub fn new(server: &str) -> Result<Self> {
        let base_url =
            Url::parse(server).with_context(|| format!("invalid server URL `{}`", server))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self { http, base_url })
    }

    /// Build a URL from path segments, percent-encoding each one.
    pub fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server URL `{}` cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        self.url(["objects", bucket].into_iter().chain(key.split('/')))
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let url = self.url(["buckets", bucket])?;
        let resp = self.http.put(url).send().await?;
        ensure_success(resp, "create bucket").await?;
        Ok(())
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let url = self.url(["buckets"])?;
        let resp = ensure_success(self.http.get(url).send().await?, "list buckets").await?;
        resp.json().await.context("decoding bucket listing")
    }

    pub async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectMetadata>> {
        let url = self.url(["objects", bucket])?;
        let resp = ensure_success(self.http.get(url).send().await?, "list objects").await?;
        resp.json().await.context("decoding object listing")
    }

    /// Stream a local file to the server. The content type is inferred from
    /// the file name.
    pub async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<ObjectMetadata> {
        let file = File::open(path)
            .await
            .with_context(|| format!("opening local file {}", path.display()))?;
        let len = file.metadata().await?.len();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        let resp = self
            .http
            .put(self.object_url(bucket, key)?)
            .header(header::CONTENT_TYPE, content_type_for(name))
            .header(header::CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let resp = ensure_success(resp, "upload object").await?;
        resp.json().await.context("decoding upload response")
    }

    /// Returns the successful response so callers can stream the body.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Response> {
        let resp = self.http.get(self.object_url(bucket, key)?).send().await?;
        ensure_success(resp, "get object").await
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        let resp = self.http.head(self.object_url(bucket, key)?).send().await?;
        let resp = ensure_success(resp, "stat object").await?;

        let headers = resp.headers();
        let get = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Ok(ObjectStat {
            content_type: get(header::CONTENT_TYPE),
            content_length: get(header::CONTENT_LENGTH),
            etag: get(header::ETAG),
            last_modified: get(header::LAST_MODIFIED),
        })
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let resp = self.http.delete(self.object_url(bucket, key)?).send().await?;
        ensure_success(resp, "delete object").await?;
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn ensure_success(resp: Response, action: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = server_message(&body);
    if message.is_empty() {
        bail!("failed to {}: {}", action, status);
    }
    bail!("failed to {}: {} ({})", action, message, status)
}

fn server_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.trim().to_string(),
    }
}
