use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;
use wallet_core::TimeRange;
use wallet_error::{Result, WalletError};

use crate::value::{Document, Fields};
use crate::{BlobStore, DocumentStore, StoredObject};

/// 基于内存的文档存储，保留插入顺序
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接放入一条带固定 ID 的文档
    pub async fn insert(&self, collection: &str, doc: Document) {
        let mut guard = self.collections.write().await;
        guard.entry(collection.to_string()).or_default().push(doc);
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<Document> {
        let guard = self.collections.read().await;
        guard
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }

    pub async fn len(&self, collection: &str) -> usize {
        let guard = self.collections.read().await;
        guard.get(collection).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| docs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn query_range(
        &self,
        collection: &str,
        time_field: &str,
        range: &TimeRange,
    ) -> Result<Vec<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| {
                        d.get(time_field)
                            .and_then(|v| v.as_timestamp())
                            .map(|t| range.contains(t))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_latest(
        &self,
        collection: &str,
        time_field: &str,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let guard = self.collections.read().await;
        // 与 Firestore 一致：缺少排序字段的文档不参与排序查询
        let mut timed: Vec<_> = guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| {
                        d.get(time_field)
                            .and_then(|v| v.as_timestamp())
                            .map(|t| (t, d))
                    })
                    .collect()
            })
            .unwrap_or_default();
        timed.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(timed
            .into_iter()
            .take(limit)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Document> {
        let doc = Document {
            id: uuid::Uuid::new_v4().simple().to_string(),
            fields,
        };
        self.insert(collection, doc.clone()).await;
        debug!(collection, id = %doc.id, "memory document created");
        Ok(doc)
    }

    async fn merge(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(doc) => doc.fields.extend(fields),
            None => docs.push(Document {
                id: id.to_string(),
                fields,
            }),
        }
        Ok(())
    }
}

/// 基于内存的对象存储
#[derive(Clone)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Arc<RwLock<HashMap<String, (String, Bytes)>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        let guard = self.objects.read().await;
        guard.get(key).map(|(ct, _)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, content_type: &str, data: Bytes) -> Result<StoredObject> {
        let mut guard = self.objects.write().await;
        guard.insert(key.to_string(), (content_type.to_string(), data));
        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let guard = self.objects.read().await;
        guard
            .get(key)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| WalletError::Storage {
                operation: "download".to_string(),
                message: format!("object {} not found", key),
            })
    }
}
