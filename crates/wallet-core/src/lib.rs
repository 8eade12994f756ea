pub mod conversation;
pub mod time_range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use conversation::{ConversationContext, ConversationTurn};
pub use time_range::{resolve, Clock, FixedClock, SystemClock, TimeRange, TimeRangeSelector};

/// 入库后的交易记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub user: String,
    pub transaction_time: DateTime<Utc>,
    pub gcs_uri: String,
    /// 模型原始输出（分类 JSON 或自由文本），不做二次校验
    pub details: String,
}

/// 上传的收据，仅在请求期间存在
#[derive(Debug, Clone, Default)]
pub struct ReceiptUpload {
    pub file_bytes: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// 毫秒级 epoch 时间戳（原始字符串）
    pub transaction_time: Option<String>,
    pub user: Option<String>,
}

/// `query-records` 请求体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRecordsRequest {
    pub collection: Option<String>,
    pub time_range: Option<String>,
    pub query_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(alias = "limit")]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecordsResponse {
    pub data: Vec<serde_json::Value>,
}

/// `query-assistant` 请求体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantRequest {
    pub user_data: Option<serde_json::Value>,
    pub user_query: Option<String>,
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub chat_history: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub gcs_uri: String,
    pub user: String,
    pub transaction_time: DateTime<Utc>,
    pub document_id: String,
    pub details: String,
}

impl IngestResponse {
    pub fn from_record(record: TransactionRecord, stored_name: &str) -> Self {
        Self {
            message: format!("File '{}' uploaded successfully.", stored_name),
            gcs_uri: record.gcs_uri,
            user: record.user,
            transaction_time: record.transaction_time,
            document_id: record.id,
            details: record.details,
        }
    }
}

pub use wallet_error::{Result, WalletError as Error};
