use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};
use wallet_core::{resolve, Clock, TimeRangeSelector};
use wallet_error::{Result, WalletError};
use wallet_store::DocumentStore;

use crate::store_failure;

/// 按时间选择器读取一个集合中的记录
pub struct RecordQueryExecutor {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    time_field: String,
}

impl RecordQueryExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, time_field: String) -> Self {
        Self {
            store,
            clock,
            time_field,
        }
    }

    /// 集合不存在或为空时返回 `NotFound`；
    /// 最近 N 条按时间倒序，其余选择器保持存储顺序。
    #[instrument(skip(self), fields(time_field = %self.time_field))]
    pub async fn execute(
        &self,
        collection: &str,
        selector: &TimeRangeSelector,
    ) -> Result<Vec<Value>> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(WalletError::validation(
                "Missing 'collection' or 'time_range' in request body",
            ));
        }
        if collection.contains('/') {
            return Err(WalletError::validation(
                "'collection' must be a top-level collection name",
            ));
        }

        let sample = self
            .store
            .list(collection, 1)
            .await
            .map_err(|e| store_failure("exists", e))?;
        if sample.is_empty() {
            debug!(collection, "collection missing or empty");
            return Err(WalletError::not_found(
                "collection does not exist or is empty",
            ));
        }

        let docs = match selector {
            TimeRangeSelector::LastN(n) => self
                .store
                .query_latest(collection, &self.time_field, *n as usize)
                .await
                .map_err(|e| store_failure("latest query", e))?,
            _ => {
                let range = resolve(selector, self.clock.now())?;
                debug!(start = %range.start, end = %range.end, "resolved time range");
                self.store
                    .query_range(collection, &self.time_field, &range)
                    .await
                    .map_err(|e| store_failure("range query", e))?
            }
        };

        info!(collection, count = docs.len(), "records fetched");
        Ok(docs.iter().map(|d| d.to_json()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use wallet_core::{FixedClock, TimeRange};
    use wallet_store::{Document, FieldValue, Fields, MemoryDocumentStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 27, 12, 0, 0).unwrap()
    }

    fn executor(store: Arc<dyn DocumentStore>) -> RecordQueryExecutor {
        RecordQueryExecutor::new(
            store,
            Arc::new(FixedClock(now())),
            "transaction_time".to_string(),
        )
    }

    fn record(id: &str, at: DateTime<Utc>) -> Document {
        let mut fields = Fields::new();
        fields.insert("transaction_time".into(), FieldValue::from(at));
        fields.insert("user".into(), FieldValue::from("aadhar"));
        Document {
            id: id.into(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_last_n_returns_newest_first() {
        let store = MemoryDocumentStore::new();
        let base = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        for day in 0..15 {
            store
                .insert(
                    "transactions",
                    record(&format!("d{day:02}"), base + Duration::days(day)),
                )
                .await;
        }

        let data = executor(Arc::new(store))
            .execute("transactions", &TimeRangeSelector::LastN(10))
            .await
            .unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(data[0]["id"], "d14");
        assert_eq!(data[9]["id"], "d05");
        assert_eq!(data[0]["transaction_time"], "2025-07-15T00:00:00Z");
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found_for_every_selector() {
        let exec = executor(Arc::new(MemoryDocumentStore::new()));
        let selectors = [
            TimeRangeSelector::Last7Days,
            TimeRangeSelector::Last30Days,
            TimeRangeSelector::LastN(5),
            TimeRangeSelector::Custom {
                start: chrono::NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                end: chrono::NaiveDate::from_ymd_opt(2025, 7, 31).unwrap(),
            },
        ];
        for selector in selectors {
            let err = exec.execute("nonexistent", &selector).await.err().unwrap();
            assert_eq!(err.to_http_status(), 404);
            assert_eq!(err.to_string(), "collection does not exist or is empty");
        }
    }

    #[tokio::test]
    async fn test_last_seven_days_excludes_now_and_older() {
        let store = MemoryDocumentStore::new();
        store.insert("tx", record("now", now())).await;
        store
            .insert("tx", record("inside", now() - Duration::days(3)))
            .await;
        store
            .insert("tx", record("edge", now() - Duration::days(7)))
            .await;
        store
            .insert("tx", record("old", now() - Duration::days(8)))
            .await;

        let data = executor(Arc::new(store))
            .execute("tx", &TimeRangeSelector::Last7Days)
            .await
            .unwrap();
        let ids: Vec<_> = data.iter().map(|v| v["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["inside", "edge"]);
    }

    #[tokio::test]
    async fn test_custom_range_includes_whole_end_day() {
        let store = MemoryDocumentStore::new();
        store
            .insert(
                "tx",
                record("late", Utc.with_ymd_and_hms(2025, 7, 20, 23, 59, 59).unwrap()),
            )
            .await;
        store
            .insert(
                "tx",
                record("next", Utc.with_ymd_and_hms(2025, 7, 21, 0, 0, 0).unwrap()),
            )
            .await;

        let selector = TimeRangeSelector::Custom {
            start: chrono::NaiveDate::from_ymd_opt(2025, 7, 20).unwrap(),
            end: chrono::NaiveDate::from_ymd_opt(2025, 7, 20).unwrap(),
        };
        let data = executor(Arc::new(store))
            .execute("tx", &selector)
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["id"], "late");
    }

    #[tokio::test]
    async fn test_blank_or_nested_collection_is_rejected() {
        let exec = executor(Arc::new(MemoryDocumentStore::new()));
        for name in ["  ", "users/u1/transactions"] {
            let err = exec
                .execute(name, &TimeRangeSelector::Last7Days)
                .await
                .err()
                .unwrap();
            assert_eq!(err.to_http_status(), 400);
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn list(&self, _: &str, _: usize) -> Result<Vec<Document>> {
            Err(WalletError::Network {
                operation: "list".into(),
                message: "connection reset".into(),
            })
        }
        async fn query_range(&self, _: &str, _: &str, _: &TimeRange) -> Result<Vec<Document>> {
            unreachable!()
        }
        async fn query_latest(&self, _: &str, _: &str, _: usize) -> Result<Vec<Document>> {
            unreachable!()
        }
        async fn create(&self, _: &str, _: Fields) -> Result<Document> {
            unreachable!()
        }
        async fn merge(&self, _: &str, _: &str, _: Fields) -> Result<()> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_store_unavailable() {
        let err = executor(Arc::new(BrokenStore))
            .execute("tx", &TimeRangeSelector::Last7Days)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::StoreUnavailable { .. }));
        assert_eq!(err.user_message(), "An internal error occurred while fetching data.");
    }
}
