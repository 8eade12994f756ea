use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use wallet_error::{Result, WalletError};
use wallet_llm::{make_providers, ModelProviderConfig, Providers};
use wallet_store::{
    BlobStore, DocumentStore, FirestoreClient, FirestoreConfig, GcsClient, GcsConfig,
    MemoryBlobStore, MemoryDocumentStore,
};

/// 服务进程共享的配置段，由各应用的 YAML 配置展开得到
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub firestore: FirestoreCfg,
    pub storage: StorageCfg,
    pub model: ModelCfg,
    #[serde(default)]
    pub query: QueryCfg,
    #[serde(default)]
    pub ingest: IngestCfg,
    #[serde(default)]
    pub assistant: AssistantCfg,
    #[serde(default)]
    pub trigger: TriggerCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreCfg {
    pub kind: String, // firestore | memory
    pub project_id: Option<String>,
    pub database: Option<String>,
    pub base_url: Option<String>,
    pub token_env: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageCfg {
    pub kind: String, // gcs | memory
    pub bucket: String,
    pub prefix: Option<String>,
    pub base_url: Option<String>,
    pub token_env: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelCfg {
    pub kind: String, // vertex | openai_compat
    pub model: String,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub api_url: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryCfg {
    #[serde(default = "default_time_field")]
    pub time_field: String,
    #[serde(default = "default_max_last_n")]
    pub max_last_n: u32,
}

impl Default for QueryCfg {
    fn default() -> Self {
        Self {
            time_field: default_time_field(),
            max_last_n: default_max_last_n(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestCfg {
    #[serde(default = "default_collection")]
    pub collection: String,
    /// 分类前从对象存储重新下载刚上传的对象
    #[serde(default)]
    pub reload_from_store: bool,
}

impl Default for IngestCfg {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            reload_from_store: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantCfg {
    #[serde(default = "default_persona")]
    pub persona: String,
    pub location_hint: Option<String>,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for AssistantCfg {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            location_hint: None,
            max_history_turns: default_max_history_turns(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerCfg {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_processor_id")]
    pub processor_id: String,
}

impl Default for TriggerCfg {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            processor_id: default_processor_id(),
        }
    }
}

fn default_time_field() -> String {
    "transaction_time".into()
}
fn default_max_last_n() -> u32 {
    1000
}
fn default_collection() -> String {
    "transactions".into()
}
fn default_persona() -> String {
    "Gemini".into()
}
fn default_max_history_turns() -> usize {
    20
}
fn default_max_context_chars() -> usize {
    48_000
}
fn default_processor_id() -> String {
    "wallet-worker".into()
}

fn read_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| WalletError::Configuration {
            key: key.to_string(),
            reason: "missing env".to_string(),
        })
}

fn optional_token(token_env: Option<&str>) -> Result<Option<String>> {
    token_env.map(read_env).transpose()
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| WalletError::Configuration {
            key: key.to_string(),
            reason: "required".to_string(),
        })
}

pub fn build_document_store(cfg: &FirestoreCfg) -> Result<Arc<dyn DocumentStore>> {
    match cfg.kind.as_str() {
        "firestore" => {
            let client = FirestoreClient::new(FirestoreConfig {
                project_id: required(cfg.project_id.as_deref(), "firestore.project_id")?
                    .to_string(),
                database: cfg.database.clone().unwrap_or_else(|| "(default)".into()),
                base_url: cfg.base_url.clone(),
                access_token: optional_token(cfg.token_env.as_deref())?,
                timeout_ms: cfg.timeout_ms,
            })?;
            info!(database = ?cfg.database, "firestore client ready");
            Ok(Arc::new(client))
        }
        "memory" => Ok(Arc::new(MemoryDocumentStore::new())),
        other => Err(WalletError::Configuration {
            key: "firestore.kind".to_string(),
            reason: format!("unsupported kind={}", other),
        }),
    }
}

pub fn build_blob_store(cfg: &StorageCfg) -> Result<Arc<dyn BlobStore>> {
    match cfg.kind.as_str() {
        "gcs" => {
            let client = GcsClient::new(GcsConfig {
                bucket: cfg.bucket.clone(),
                base_url: cfg.base_url.clone(),
                access_token: optional_token(cfg.token_env.as_deref())?,
                timeout_ms: cfg.timeout_ms,
            })?;
            info!(bucket = %cfg.bucket, "cloud storage client ready");
            Ok(Arc::new(client))
        }
        "memory" => Ok(Arc::new(MemoryBlobStore::new(cfg.bucket.clone()))),
        other => Err(WalletError::Configuration {
            key: "storage.kind".to_string(),
            reason: format!("unsupported kind={}", other),
        }),
    }
}

pub fn build_models(cfg: &ModelCfg) -> Result<Providers> {
    let provider = match cfg.kind.as_str() {
        "vertex" => ModelProviderConfig::Vertex {
            project_id: required(cfg.project_id.as_deref(), "model.project_id")?.to_string(),
            location: required(cfg.location.as_deref(), "model.location")?.to_string(),
            model: cfg.model.clone(),
            access_token: read_env(
                cfg.api_key_env
                    .as_deref()
                    .unwrap_or("GOOGLE_OAUTH_ACCESS_TOKEN"),
            )?,
            api_url: cfg.api_url.clone(),
            temperature: cfg.temperature,
            timeout_ms: cfg.timeout_ms,
        },
        "openai_compat" => ModelProviderConfig::OpenAiCompat {
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into()),
            api_key: read_env(cfg.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY"))?,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            timeout_ms: cfg.timeout_ms,
        },
        other => {
            return Err(WalletError::Configuration {
                key: "model.kind".to_string(),
                reason: format!("unsupported kind={}", other),
            })
        }
    };
    info!(kind = %cfg.kind, model = %cfg.model, "model provider ready");
    make_providers(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let cfg: ServiceConfig = serde_json::from_value(serde_json::json!({
            "firestore": {"kind": "memory"},
            "storage": {"kind": "memory", "bucket": "b"},
            "model": {"kind": "vertex", "model": "m"}
        }))
        .unwrap();
        assert_eq!(cfg.query.time_field, "transaction_time");
        assert_eq!(cfg.query.max_last_n, 1000);
        assert_eq!(cfg.ingest.collection, "transactions");
        assert!(!cfg.ingest.reload_from_store);
        assert_eq!(cfg.assistant.max_history_turns, 20);
        assert_eq!(cfg.trigger.processor_id, "wallet-worker");
    }

    #[test]
    fn test_memory_backends_build_and_missing_token_fails() {
        let cfg: ServiceConfig = serde_json::from_value(serde_json::json!({
            "firestore": {"kind": "memory"},
            "storage": {"kind": "memory", "bucket": "wallet-images"},
            "model": {
                "kind": "vertex",
                "model": "gemini-2.5-flash-lite",
                "project_id": "demo",
                "location": "us-central1",
                "api_key_env": "WALLET_TEST_TOKEN_THAT_IS_NEVER_SET"
            },
            "query": {"time_field": "created_at"}
        }))
        .unwrap();
        assert_eq!(cfg.query.time_field, "created_at");
        assert!(build_document_store(&cfg.firestore).is_ok());
        assert!(build_blob_store(&cfg.storage).is_ok());
        let err = build_models(&cfg.model).err().unwrap();
        assert!(matches!(err, WalletError::Configuration { .. }));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let cfg = FirestoreCfg {
            kind: "mongo".into(),
            project_id: None,
            database: None,
            base_url: None,
            token_env: None,
            timeout_ms: None,
        };
        assert!(build_document_store(&cfg).is_err());

        let cfg = FirestoreCfg {
            kind: "firestore".into(),
            project_id: None,
            database: None,
            base_url: None,
            token_env: None,
            timeout_ms: None,
        };
        assert!(build_document_store(&cfg).is_err());
    }
}
