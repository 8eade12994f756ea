use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{error, info};
use wallet_core::{Clock, SystemClock};
use wallet_error::{Result, WalletError};
use wallet_llm::{ChatModel, Providers, VisionModel};
use wallet_store::{BlobStore, DocumentStore};

use crate::assistant::{AssistantSettings, ConversationalQueryAssistant};
use crate::config::{build_blob_store, build_document_store, build_models, ServiceConfig};
use crate::ingest::{IngestSettings, ReceiptIngestionPipeline};
use crate::query::RecordQueryExecutor;
use crate::trigger::RecordStatusTrigger;

type Init<T> = Box<dyn Fn() -> Result<Arc<T>> + Send + Sync>;

/// 首次使用时才初始化的协作方。
///
/// 初始化至多执行一次；失败会被记住，之后每次访问都返回 `ServiceUnavailable`，
/// 进程本身继续对外服务。
pub struct LazyCollaborator<T: ?Sized> {
    name: &'static str,
    cell: OnceCell<std::result::Result<Arc<T>, String>>,
    init: Init<T>,
}

impl<T: ?Sized> LazyCollaborator<T> {
    pub fn new(
        name: &'static str,
        init: impl Fn() -> Result<Arc<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// 已就绪的协作方（测试与嵌入场景）
    pub fn ready(name: &'static str, value: Arc<T>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(Ok(value));
        Self {
            name,
            cell,
            init: Box::new(|| {
                Err(WalletError::Internal {
                    message: "collaborator already initialised".to_string(),
                })
            }),
        }
    }

    pub fn get(&self) -> Result<Arc<T>> {
        let state = self.cell.get_or_init(|| match (self.init)() {
            Ok(value) => {
                info!(collaborator = self.name, "collaborator initialised");
                Ok(value)
            }
            Err(e) => {
                error!(collaborator = self.name, error = %e, "collaborator initialisation failed");
                Err(e.to_string())
            }
        });
        match state {
            Ok(value) => Ok(Arc::clone(value)),
            Err(reason) => Err(WalletError::ServiceUnavailable {
                service: self.name.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// 进程级共享上下文：配置、时钟以及惰性创建的外部客户端
pub struct ServiceContext {
    config: ServiceConfig,
    clock: Arc<dyn Clock>,
    documents: LazyCollaborator<dyn DocumentStore>,
    blobs: LazyCollaborator<dyn BlobStore>,
    models: LazyCollaborator<Providers>,
}

impl ServiceContext {
    /// 仅保存配置，外部客户端在第一次请求时创建
    pub fn from_config(config: ServiceConfig) -> Self {
        let firestore = config.firestore.clone();
        let storage = config.storage.clone();
        let model = config.model.clone();
        Self {
            documents: LazyCollaborator::new("Firestore client", move || {
                build_document_store(&firestore)
            }),
            blobs: LazyCollaborator::new("Storage client", move || build_blob_store(&storage)),
            models: LazyCollaborator::new("Language model", move || {
                build_models(&model).map(Arc::new)
            }),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_collaborators(
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
        documents: LazyCollaborator<dyn DocumentStore>,
        blobs: LazyCollaborator<dyn BlobStore>,
        models: LazyCollaborator<Providers>,
    ) -> Self {
        Self {
            config,
            clock,
            documents,
            blobs,
            models,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn documents(&self) -> Result<Arc<dyn DocumentStore>> {
        self.documents.get()
    }

    pub fn blobs(&self) -> Result<Arc<dyn BlobStore>> {
        self.blobs.get()
    }

    pub fn chat(&self) -> Result<Arc<dyn ChatModel>> {
        self.models.get().map(|p| Arc::clone(&p.chat))
    }

    pub fn vision(&self) -> Result<Arc<dyn VisionModel>> {
        self.models.get().map(|p| Arc::clone(&p.vision))
    }

    pub fn record_query(&self) -> Result<RecordQueryExecutor> {
        Ok(RecordQueryExecutor::new(
            self.documents()?,
            Arc::clone(&self.clock),
            self.config.query.time_field.clone(),
        ))
    }

    pub fn ingestion(&self) -> Result<ReceiptIngestionPipeline> {
        Ok(ReceiptIngestionPipeline::new(
            self.blobs()?,
            self.documents()?,
            self.vision()?,
            IngestSettings {
                collection: self.config.ingest.collection.clone(),
                key_prefix: self.config.storage.prefix.clone(),
                reload_from_store: self.config.ingest.reload_from_store,
            },
        ))
    }

    pub fn assistant(&self) -> Result<ConversationalQueryAssistant> {
        Ok(ConversationalQueryAssistant::new(
            self.chat()?,
            Arc::clone(&self.clock),
            AssistantSettings::from(&self.config.assistant),
        ))
    }

    pub fn status_trigger(&self) -> Result<RecordStatusTrigger> {
        Ok(RecordStatusTrigger::new(
            self.documents()?,
            self.config.trigger.collection.clone(),
            self.config.trigger.processor_id.clone(),
        ))
    }

    pub fn max_last_n(&self) -> u32 {
        self.config.query.max_last_n
    }
}
