use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use wallet_core::{ReceiptUpload, TransactionRecord};
use wallet_error::{Result, WalletError};
use wallet_llm::VisionModel;
use wallet_store::{BlobStore, DocumentStore, FieldValue, Fields};

use crate::{model_failure, storage_failure, store_failure};

/// 收据分类指令，要求模型只返回结构化 JSON
pub const CLASSIFICATION_INSTRUCTION: &str = r#"You are a receipt classification assistant.
Analyze the attached receipt image and respond with a single JSON object and nothing else.
Use exactly these keys:
{
  "transaction_type": one of ["entertainment", "health", "utility", "groceries", "dining", "misc"],
  "transaction_amount": number (the total amount paid),
  "transaction_details": string (a short breakdown of the items and charges on the receipt),
  "transaction_location": string (the store or place of purchase, or "na" if unknown)
}
Choose "misc" when no other transaction_type fits. Do not wrap the JSON in markdown."#;

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub collection: String,
    /// 对象名前缀，如 `receipts/`
    pub key_prefix: Option<String>,
    pub reload_from_store: bool,
}

/// 入库结果
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: TransactionRecord,
    /// 清洗后的文件名
    pub stored_name: String,
}

/// 收据入库流水线：校验 → 上传 → 分类 → 写记录
///
/// 各步骤严格串行，任一步失败即停止；已上传的对象不会回滚。
pub struct ReceiptIngestionPipeline {
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStore>,
    vision: Arc<dyn VisionModel>,
    settings: IngestSettings,
}

/// 通过校验的上传；构造后即可交给流水线
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    data: Vec<u8>,
    stored_name: String,
    content_type: String,
    transaction_time: DateTime<Utc>,
    user: String,
}

impl ValidatedUpload {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn stored_name(&self) -> &str {
        &self.stored_name
    }
}

impl ReceiptIngestionPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStore>,
        vision: Arc<dyn VisionModel>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            blobs,
            documents,
            vision,
            settings,
        }
    }

    pub async fn ingest(&self, upload: ReceiptUpload) -> Result<IngestOutcome> {
        self.ingest_validated(validate_upload(upload)?).await
    }

    #[instrument(skip(self, upload), fields(collection = %self.settings.collection))]
    pub async fn ingest_validated(&self, upload: ValidatedUpload) -> Result<IngestOutcome> {
        let key = match &self.settings.key_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}{}", prefix, upload.stored_name),
            _ => upload.stored_name.clone(),
        };

        let data = Bytes::from(upload.data);
        let object = self
            .blobs
            .upload(&key, &upload.content_type, data.clone())
            .await
            .map_err(|e| storage_failure("upload", e))?;
        let gcs_uri = object.uri();
        info!(uri = %gcs_uri, user = %upload.user, "receipt stored");

        let image = if self.settings.reload_from_store {
            self.blobs
                .download(&object.key)
                .await
                .map_err(|e| storage_failure("download", e))?
        } else {
            data
        };

        let details = self
            .vision
            .describe_image(CLASSIFICATION_INSTRUCTION, &image, &upload.content_type)
            .await
            .map_err(|e| {
                warn!(uri = %gcs_uri, "classification failed, stored object is kept");
                model_failure("vision", e)
            })?;

        let mut fields = Fields::new();
        fields.insert("user".into(), FieldValue::from(upload.user.clone()));
        fields.insert(
            "transaction_time".into(),
            FieldValue::from(upload.transaction_time),
        );
        fields.insert("gcs_uri".into(), FieldValue::from(gcs_uri.clone()));
        fields.insert("details".into(), FieldValue::from(details.clone()));

        let doc = self
            .documents
            .create(&self.settings.collection, fields)
            .await
            .map_err(|e| store_failure("create", e))?;
        info!(document_id = %doc.id, "transaction record created");

        Ok(IngestOutcome {
            record: TransactionRecord {
                id: doc.id,
                user: upload.user,
                transaction_time: upload.transaction_time,
                gcs_uri,
                details,
            },
            stored_name: upload.stored_name,
        })
    }
}

/// 校验上传内容，不访问任何协作方
pub fn validate_upload(upload: ReceiptUpload) -> Result<ValidatedUpload> {
    let data = match upload.file_bytes {
        Some(bytes) if !bytes.is_empty() => bytes,
        Some(_) => return Err(WalletError::validation("No selected file")),
        None => return Err(WalletError::validation("Missing 'file' in form data")),
    };
    let raw_name = upload
        .filename
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| WalletError::validation("No selected file"))?;
    let stored_name = sanitize_filename(&raw_name)
        .ok_or_else(|| WalletError::validation("Invalid file name"))?;

    let raw_time = upload
        .transaction_time
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(missing_form_field)?;
    let transaction_time = parse_epoch_millis(&raw_time)?;

    let user = upload
        .user
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(missing_form_field)?;

    let content_type = resolve_content_type(upload.content_type.as_deref(), &stored_name);

    Ok(ValidatedUpload {
        data,
        stored_name,
        content_type,
        transaction_time,
        user,
    })
}

fn missing_form_field() -> WalletError {
    WalletError::validation("Missing 'transaction_time' or 'user' in form data")
}

/// 毫秒级 epoch 时间戳 → UTC 时间
pub fn parse_epoch_millis(raw: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = raw.trim().parse().map_err(|_| {
        WalletError::validation("'transaction_time' must be epoch milliseconds")
    })?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| WalletError::validation("'transaction_time' is out of range"))
}

/// 去掉路径部分并只保留 ASCII 字母数字、`.`、`-`、`_`，空白替换为 `_`。
/// 清洗后为空时返回 `None`。
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            out.push(c);
        } else if c.is_whitespace() {
            out.push('_');
        }
    }
    let cleaned = out.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// 优先使用上传时声明的类型；缺失或为通用二进制时按扩展名推断
pub fn resolve_content_type(declared: Option<&str>, filename: &str) -> String {
    if let Some(ct) = declared
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
    {
        return ct.to_string();
    }
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => DEFAULT_CONTENT_TYPE,
    }
    .to_string()
}
