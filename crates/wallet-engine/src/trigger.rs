use std::sync::Arc;

use tracing::{debug, info, instrument};
use wallet_error::{Result, WalletError};
use wallet_store::{DocumentStore, FieldValue, Fields};

use crate::store_failure;

pub const PENDING_STATUS: &str = "pending";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Applied,
    /// 事件来自未监听的集合
    Ignored,
}

/// 新记录创建后补写处理状态
pub struct RecordStatusTrigger {
    store: Arc<dyn DocumentStore>,
    watched_collection: String,
    processor_id: String,
}

impl RecordStatusTrigger {
    pub fn new(store: Arc<dyn DocumentStore>, watched_collection: String, processor_id: String) -> Self {
        Self {
            store,
            watched_collection,
            processor_id,
        }
    }

    /// 只合并 `status` 与 `processedBy` 两个字段，重复投递结果相同
    #[instrument(skip(self))]
    pub async fn on_record_created(&self, collection: &str, id: &str) -> Result<TriggerOutcome> {
        if collection != self.watched_collection {
            debug!(watched = %self.watched_collection, "event ignored");
            return Ok(TriggerOutcome::Ignored);
        }

        let mut fields = Fields::new();
        fields.insert("status".into(), FieldValue::from(PENDING_STATUS));
        fields.insert(
            "processedBy".into(),
            FieldValue::from(self.processor_id.clone()),
        );
        self.store
            .merge(collection, id, fields)
            .await
            .map_err(|e| store_failure("merge", e))?;
        info!("record marked pending");
        Ok(TriggerOutcome::Applied)
    }
}

/// 解析 `documents/<collection>/<id>` 形式的事件主题
pub fn parse_document_subject(subject: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = subject.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        ["documents", collection, id] if !collection.is_empty() && !id.is_empty() => {
            Ok((collection.to_string(), id.to_string()))
        }
        _ => Err(WalletError::validation(format!(
            "unsupported event subject '{}'",
            subject
        ))),
    }
}
