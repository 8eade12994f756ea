pub mod firestore;
pub mod gcs;
pub mod memory;
pub mod value;

use async_trait::async_trait;
use bytes::Bytes;
use wallet_core::TimeRange;

pub use firestore::{FirestoreClient, FirestoreConfig};
pub use gcs::{GcsClient, GcsConfig};
pub use memory::{MemoryBlobStore, MemoryDocumentStore};
pub use value::{Document, FieldValue, Fields};
pub use wallet_error::{Result, WalletError};

/// 文档数据库抽象接口
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 按存储顺序读取至多 `limit` 条
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Document>>;

    /// 时间字段落在 `[range.start, range.end)` 内的文档
    async fn query_range(
        &self,
        collection: &str,
        time_field: &str,
        range: &TimeRange,
    ) -> Result<Vec<Document>>;

    /// 按时间字段倒序取最新的 `limit` 条
    async fn query_latest(
        &self,
        collection: &str,
        time_field: &str,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// 新建文档，由存储分配 ID
    async fn create(&self, collection: &str, fields: Fields) -> Result<Document>;

    /// 仅写入给定字段，其余字段保持不变
    async fn merge(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;
}

/// 已写入对象存储的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
}

impl StoredObject {
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.key)
    }
}

/// 对象存储抽象接口；同名对象直接覆盖
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, content_type: &str, data: Bytes) -> Result<StoredObject>;

    async fn download(&self, key: &str) -> Result<Bytes>;
}
