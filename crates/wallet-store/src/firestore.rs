use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use wallet_core::TimeRange;
use wallet_error::{Result, WalletError};

use crate::value::{Document, FieldValue, Fields};
use crate::DocumentStore;

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Firestore REST 客户端配置
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// 命名数据库，默认 `(default)`
    pub database: String,
    /// 覆盖 API 地址（如本地模拟器 `http://localhost:8080`）
    pub base_url: Option<String>,
    /// 为空时不带 Authorization 头，适用于模拟器
    pub access_token: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// 基于 Firestore REST v1 的文档存储
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    cfg: FirestoreConfig,
}

impl FirestoreClient {
    pub fn new(cfg: FirestoreConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(
                cfg.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ))
            .build()
            .map_err(|e| WalletError::Configuration {
                key: "firestore.timeout_ms".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { http, cfg })
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            self.cfg
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/'),
            self.cfg.project_id,
            self.cfg.database
        )
    }

    fn document_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.documents_root()).map_err(|e| {
            WalletError::Configuration {
                key: "firestore.base_url".to_string(),
                reason: e.to_string(),
            }
        })?;
        url.path_segments_mut()
            .map_err(|_| WalletError::Configuration {
                key: "firestore.base_url".to_string(),
                reason: "base url cannot carry a path".to_string(),
            })?
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.access_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn run_query(&self, structured_query: serde_json::Value) -> Result<Vec<Document>> {
        let url = format!("{}:runQuery", self.documents_root());
        let resp = self
            .authorize(self.http.post(url))
            .json(&json!({ "structuredQuery": structured_query }))
            .send()
            .await
            .map_err(|e| unavailable("run_query", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(unavailable(
                "run_query",
                format!("status={} body={}", status, txt),
            ));
        }

        let entries: Vec<RunQueryEntry> =
            resp.json().await.map_err(|e| unavailable("run_query", e))?;
        let docs = entries
            .into_iter()
            .filter_map(|e| e.document)
            .map(WireDocument::into_document)
            .collect::<Result<Vec<_>>>()?;
        debug!(count = docs.len(), "firestore query returned");
        Ok(docs)
    }
}

fn unavailable(operation: &str, err: impl std::fmt::Display) -> WalletError {
    WalletError::StoreUnavailable {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

fn timestamp_value(t: DateTime<Utc>) -> serde_json::Value {
    json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
}

/// 字段路径中含非常规字符时需要反引号包裹
fn quote_field_path(field: &str) -> String {
    let simple = field
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn range_query(collection: &str, time_field: &str, range: &TimeRange) -> serde_json::Value {
    let path = quote_field_path(time_field);
    json!({
        "from": [{ "collectionId": collection }],
        "where": {
            "compositeFilter": {
                "op": "AND",
                "filters": [
                    { "fieldFilter": {
                        "field": { "fieldPath": path },
                        "op": "GREATER_THAN_OR_EQUAL",
                        "value": timestamp_value(range.start)
                    }},
                    { "fieldFilter": {
                        "field": { "fieldPath": path },
                        "op": "LESS_THAN",
                        "value": timestamp_value(range.end)
                    }}
                ]
            }
        }
    })
}

fn latest_query(collection: &str, time_field: &str, limit: usize) -> serde_json::Value {
    json!({
        "from": [{ "collectionId": collection }],
        "orderBy": [{
            "field": { "fieldPath": quote_field_path(time_field) },
            "direction": "DESCENDING"
        }],
        "limit": limit
    })
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    #[instrument(skip(self))]
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Document>> {
        self.run_query(json!({
            "from": [{ "collectionId": collection }],
            "limit": limit
        }))
        .await
    }

    #[instrument(skip(self, range), fields(start = %range.start, end = %range.end))]
    async fn query_range(
        &self,
        collection: &str,
        time_field: &str,
        range: &TimeRange,
    ) -> Result<Vec<Document>> {
        self.run_query(range_query(collection, time_field, range))
            .await
    }

    #[instrument(skip(self))]
    async fn query_latest(
        &self,
        collection: &str,
        time_field: &str,
        limit: usize,
    ) -> Result<Vec<Document>> {
        self.run_query(latest_query(collection, time_field, limit))
            .await
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, collection: &str, fields: Fields) -> Result<Document> {
        let url = self.document_url(&[collection])?;
        let body = WireWrite {
            fields: fields.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
        };
        let resp = self
            .authorize(self.http.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("create_document", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(unavailable(
                "create_document",
                format!("status={} body={}", status, txt),
            ));
        }

        let doc: WireDocument = resp
            .json()
            .await
            .map_err(|e| unavailable("create_document", e))?;
        doc.into_document()
    }

    #[instrument(skip(self, fields))]
    async fn merge(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut url = self.document_url(&[collection, id])?;
        {
            let mut pairs = url.query_pairs_mut();
            for key in fields.keys() {
                pairs.append_pair("updateMask.fieldPaths", &quote_field_path(key));
            }
        }
        let body = WireWrite {
            fields: fields.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
        };
        let resp = self
            .authorize(self.http.patch(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("merge_document", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(unavailable(
                "merge_document",
                format!("status={} body={}", status, txt),
            ));
        }
        Ok(())
    }
}

// ========== REST wire types ==========

#[derive(Deserialize)]
struct RunQueryEntry {
    document: Option<WireDocument>,
}

#[derive(Deserialize)]
struct WireDocument {
    name: String,
    #[serde(default)]
    fields: BTreeMap<String, WireValue>,
}

impl WireDocument {
    fn into_document(self) -> Result<Document> {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let fields = self
            .fields
            .into_iter()
            .map(|(k, v)| FieldValue::try_from(v).map(|fv| (k, fv)))
            .collect::<Result<Fields>>()?;
        Ok(Document { id, fields })
    }
}

#[derive(Serialize)]
struct WireWrite {
    fields: BTreeMap<String, WireValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
enum WireValue {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(WireLatLng),
    ArrayValue(WireArray),
    MapValue(WireMap),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireLatLng {
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireArray {
    #[serde(default)]
    values: Vec<WireValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireMap {
    #[serde(default)]
    fields: BTreeMap<String, WireValue>,
}

impl From<&FieldValue> for WireValue {
    fn from(v: &FieldValue) -> Self {
        match v {
            FieldValue::Null => WireValue::NullValue(()),
            FieldValue::Bool(b) => WireValue::BooleanValue(*b),
            FieldValue::Integer(i) => WireValue::IntegerValue(i.to_string()),
            FieldValue::Double(d) => WireValue::DoubleValue(*d),
            FieldValue::String(s) => WireValue::StringValue(s.clone()),
            FieldValue::Timestamp(t) => {
                WireValue::TimestampValue(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            FieldValue::Bytes(b) => WireValue::BytesValue(b.clone()),
            FieldValue::Reference(r) => WireValue::ReferenceValue(r.clone()),
            FieldValue::GeoPoint {
                latitude,
                longitude,
            } => WireValue::GeoPointValue(WireLatLng {
                latitude: *latitude,
                longitude: *longitude,
            }),
            FieldValue::Array(items) => WireValue::ArrayValue(WireArray {
                values: items.iter().map(Into::into).collect(),
            }),
            FieldValue::Map(fields) => WireValue::MapValue(WireMap {
                fields: fields.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            }),
        }
    }
}

impl TryFrom<WireValue> for FieldValue {
    type Error = WalletError;

    fn try_from(v: WireValue) -> Result<Self> {
        let decode_err = |what: &str, raw: &str| WalletError::Serialization {
            format: "firestore".to_string(),
            message: format!("invalid {}: {}", what, raw),
        };
        Ok(match v {
            WireValue::NullValue(()) => FieldValue::Null,
            WireValue::BooleanValue(b) => FieldValue::Bool(b),
            WireValue::IntegerValue(s) => {
                FieldValue::Integer(s.parse().map_err(|_| decode_err("integerValue", &s))?)
            }
            WireValue::DoubleValue(d) => FieldValue::Double(d),
            WireValue::TimestampValue(s) => FieldValue::Timestamp(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| decode_err("timestampValue", &s))?
                    .with_timezone(&Utc),
            ),
            WireValue::StringValue(s) => FieldValue::String(s),
            WireValue::BytesValue(b) => FieldValue::Bytes(b),
            WireValue::ReferenceValue(r) => FieldValue::Reference(r),
            WireValue::GeoPointValue(p) => FieldValue::GeoPoint {
                latitude: p.latitude,
                longitude: p.longitude,
            },
            WireValue::ArrayValue(a) => FieldValue::Array(
                a.values
                    .into_iter()
                    .map(FieldValue::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            WireValue::MapValue(m) => FieldValue::Map(
                m.fields
                    .into_iter()
                    .map(|(k, v)| FieldValue::try_from(v).map(|fv| (k, fv)))
                    .collect::<Result<Fields>>()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> FirestoreClient {
        FirestoreClient::new(FirestoreConfig {
            project_id: "demo".into(),
            database: "receipt-management".into(),
            base_url: Some("http://localhost:8080/".into()),
            access_token: None,
            timeout_ms: None,
        })
        .unwrap()
    }

    #[test]
    fn test_document_urls() {
        let c = client();
        assert_eq!(
            c.documents_root(),
            "http://localhost:8080/v1/projects/demo/databases/receipt-management/documents"
        );
        let url = c.document_url(&["transactions", "a b"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/demo/databases/receipt-management/documents/transactions/a%20b"
        );
    }

    #[test]
    fn test_range_query_is_half_open() {
        let range = TimeRange {
            start: Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 7, 2, 0, 0, 0).unwrap(),
        };
        let q = range_query("transactions", "transaction_time", &range);
        let filters = &q["where"]["compositeFilter"]["filters"];
        assert_eq!(filters[0]["fieldFilter"]["op"], "GREATER_THAN_OR_EQUAL");
        assert_eq!(filters[1]["fieldFilter"]["op"], "LESS_THAN");
        assert_eq!(
            filters[1]["fieldFilter"]["value"]["timestampValue"],
            "2025-07-02T00:00:00Z"
        );
    }

    #[test]
    fn test_latest_query_orders_descending() {
        let q = latest_query("transactions", "transaction_time", 10);
        assert_eq!(q["orderBy"][0]["direction"], "DESCENDING");
        assert_eq!(q["limit"], 10);
    }

    #[test]
    fn test_quote_field_path() {
        assert_eq!(quote_field_path("processedBy"), "processedBy");
        assert_eq!(quote_field_path("created-at"), "`created-at`");
        assert_eq!(quote_field_path("1st"), "`1st`");
    }

    #[test]
    fn test_wire_document_decoding() {
        let raw = serde_json::json!({
            "name": "projects/demo/databases/(default)/documents/transactions/abc123",
            "fields": {
                "user": { "stringValue": "alice" },
                "amount": { "integerValue": "42" },
                "transaction_time": { "timestampValue": "2025-07-27T10:00:00.123Z" },
                "tags": { "arrayValue": { "values": [{ "stringValue": "food" }] } },
                "empty": { "mapValue": {} },
                "gone": { "nullValue": null }
            }
        });
        let doc: WireDocument = serde_json::from_value(raw).unwrap();
        let doc = doc.into_document().unwrap();
        assert_eq!(doc.id, "abc123");
        assert_eq!(doc.get("amount"), Some(&FieldValue::Integer(42)));
        assert_eq!(doc.get("gone"), Some(&FieldValue::Null));
        assert_eq!(doc.get("empty"), Some(&FieldValue::Map(Fields::new())));
        assert!(doc.get("transaction_time").unwrap().as_timestamp().is_some());
    }

    #[test]
    fn test_wire_value_encoding() {
        let t = Utc.with_ymd_and_hms(2025, 7, 27, 10, 0, 0).unwrap();
        let v = serde_json::to_value(WireValue::from(&FieldValue::Timestamp(t))).unwrap();
        assert_eq!(v, serde_json::json!({"timestampValue": "2025-07-27T10:00:00Z"}));
        let v = serde_json::to_value(WireValue::from(&FieldValue::Integer(7))).unwrap();
        assert_eq!(v, serde_json::json!({"integerValue": "7"}));
        let v = serde_json::to_value(WireValue::from(&FieldValue::Null)).unwrap();
        assert_eq!(v, serde_json::json!({"nullValue": null}));
    }
}
