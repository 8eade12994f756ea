use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use tracing::{info, instrument};
use wallet_error::{Result, WalletError};

use crate::{BlobStore, StoredObject};

const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Cloud Storage JSON API 配置
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    /// 覆盖 API 地址（如 `fake-gcs-server`）
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone)]
pub struct GcsClient {
    http: Client,
    cfg: GcsConfig,
}

impl GcsClient {
    pub fn new(cfg: GcsConfig) -> Result<Self> {
        if cfg.bucket.trim().is_empty() {
            return Err(WalletError::Configuration {
                key: "storage.bucket".to_string(),
                reason: "bucket name is empty".to_string(),
            });
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(
                cfg.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ))
            .build()
            .map_err(|e| WalletError::Configuration {
                key: "storage.timeout_ms".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { http, cfg })
    }

    fn base(&self) -> &str {
        self.cfg
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    fn url(&self, path: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base(), path)).map_err(|e| {
            WalletError::Configuration {
                key: "storage.base_url".to_string(),
                reason: e.to_string(),
            }
        })?;
        url.path_segments_mut()
            .map_err(|_| WalletError::Configuration {
                key: "storage.base_url".to_string(),
                reason: "base url cannot carry a path".to_string(),
            })?
            .extend(segments);
        Ok(url)
    }

    fn upload_url(&self, key: &str) -> Result<Url> {
        let mut url = self.url("upload/storage/v1/b", &[self.cfg.bucket.as_str(), "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn download_url(&self, key: &str) -> Result<Url> {
        let mut url = self.url("storage/v1/b", &[self.cfg.bucket.as_str(), "o", key])?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.access_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }
}

fn storage_error(operation: &str, err: impl std::fmt::Display) -> WalletError {
    WalletError::Storage {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl BlobStore for GcsClient {
    #[instrument(skip(self, data), fields(bucket = %self.cfg.bucket, size = data.len()))]
    async fn upload(&self, key: &str, content_type: &str, data: Bytes) -> Result<StoredObject> {
        let resp = self
            .authorize(self.http.post(self.upload_url(key)?))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| storage_error("upload", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(storage_error(
                "upload",
                format!("status={} body={}", status, txt),
            ));
        }

        let object = StoredObject {
            bucket: self.cfg.bucket.clone(),
            key: key.to_string(),
        };
        info!(uri = %object.uri(), "object uploaded");
        Ok(object)
    }

    #[instrument(skip(self), fields(bucket = %self.cfg.bucket))]
    async fn download(&self, key: &str) -> Result<Bytes> {
        let resp = self
            .authorize(self.http.get(self.download_url(key)?))
            .send()
            .await
            .map_err(|e| storage_error("download", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(storage_error(
                "download",
                format!("status={} body={}", status, txt),
            ));
        }

        resp.bytes().await.map_err(|e| storage_error("download", e))
    }
}
