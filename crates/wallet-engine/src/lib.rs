pub mod assistant;
pub mod config;
pub mod context;
pub mod ingest;
pub mod query;
pub mod trigger;

use wallet_error::WalletError;

pub use assistant::{
    AssistantSettings, ConversationalQueryAssistant, FOLLOW_UP_INSTRUCTION, GREETING_INSTRUCTION,
};
pub use config::ServiceConfig;
pub use context::{LazyCollaborator, ServiceContext};
pub use ingest::{
    sanitize_filename, validate_upload, IngestOutcome, IngestSettings, ReceiptIngestionPipeline,
    ValidatedUpload, CLASSIFICATION_INSTRUCTION,
};
pub use query::RecordQueryExecutor;
pub use trigger::{parse_document_subject, RecordStatusTrigger, TriggerOutcome};
pub use wallet_error::Result;

// 协作方错误统一归类；已是目标类别或属于调用方问题的错误原样返回

pub(crate) fn store_failure(operation: &str, err: WalletError) -> WalletError {
    match err {
        WalletError::StoreUnavailable { .. } | WalletError::Validation { .. } => err,
        other => WalletError::StoreUnavailable {
            operation: operation.to_string(),
            message: other.cause().to_string(),
        },
    }
}

pub(crate) fn storage_failure(operation: &str, err: WalletError) -> WalletError {
    match err {
        WalletError::Storage { .. } | WalletError::Validation { .. } => err,
        other => WalletError::Storage {
            operation: operation.to_string(),
            message: other.cause().to_string(),
        },
    }
}

pub(crate) fn model_failure(provider: &str, err: WalletError) -> WalletError {
    match err {
        WalletError::ModelUnavailable { .. } => err,
        other => WalletError::ModelUnavailable {
            provider: provider.to_string(),
            message: other.cause().to_string(),
        },
    }
}
