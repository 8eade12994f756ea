use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum WalletError {
    // === 请求错误 ===
    #[error("{message}")]
    Validation { message: String },

    #[error("{resource}")]
    NotFound { resource: String },

    #[error("Only POST method is accepted")]
    MethodNotAllowed { method: String },

    // === 协作服务错误 ===
    #[error("object storage failure during {operation}")]
    Storage { operation: String, message: String },

    #[error("document store unavailable during {operation}")]
    StoreUnavailable { operation: String, message: String },

    #[error("language model unavailable ({provider})")]
    ModelUnavailable { provider: String, message: String },

    #[error("service unavailable: {service}")]
    ServiceUnavailable { service: String, reason: String },

    // === 系统错误 ===
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("serialization error: {format}")]
    Serialization { format: String, message: String },

    #[error("network error: {operation}")]
    Network { operation: String, message: String },

    #[error("timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 调用方输入问题
    Medium,   // 协作服务故障，单个请求失败
    High,     // 影响核心功能的错误
    Critical, // 进程级初始化或配置错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub user: Option<String>,
    pub collection: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl WalletError {
    pub fn validation(message: impl Into<String>) -> Self {
        WalletError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        WalletError::NotFound {
            resource: resource.into(),
        }
    }

    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WalletError::Validation { .. }
            | WalletError::NotFound { .. }
            | WalletError::MethodNotAllowed { .. } => ErrorSeverity::Low,
            WalletError::Storage { .. }
            | WalletError::StoreUnavailable { .. }
            | WalletError::ModelUnavailable { .. }
            | WalletError::Network { .. }
            | WalletError::Timeout { .. } => ErrorSeverity::Medium,
            WalletError::Serialization { .. } | WalletError::Internal { .. } => {
                ErrorSeverity::High
            }
            WalletError::ServiceUnavailable { .. } | WalletError::Configuration { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// 是否为调用方可见的错误（4xx）
    pub fn is_client_error(&self) -> bool {
        self.to_http_status() < 500
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user = ?metadata.user,
                    collection = ?metadata.collection,
                    error = %self,
                    "request rejected"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user = ?metadata.user,
                    collection = ?metadata.collection,
                    error = %self,
                    cause = %self.cause(),
                    context = ?metadata.context,
                    "collaborator failure"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user = ?metadata.user,
                    collection = ?metadata.collection,
                    error = %self,
                    cause = %self.cause(),
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "internal failure"
                );
            }
        }
    }

    /// 底层原因，仅用于日志，不返回给调用方
    pub fn cause(&self) -> &str {
        match self {
            WalletError::Storage { message, .. }
            | WalletError::StoreUnavailable { message, .. }
            | WalletError::ModelUnavailable { message, .. }
            | WalletError::Serialization { message, .. }
            | WalletError::Network { message, .. }
            | WalletError::Internal { message }
            | WalletError::Validation { message } => message,
            WalletError::ServiceUnavailable { reason, .. }
            | WalletError::Configuration { reason, .. } => reason,
            WalletError::NotFound { resource } => resource,
            WalletError::MethodNotAllowed { method } => method,
            WalletError::Timeout { operation, .. } => operation,
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            WalletError::Validation { .. } => 400,
            WalletError::NotFound { .. } => 404,
            WalletError::MethodNotAllowed { .. } => 405,
            _ => 500,
        }
    }

    /// 获取用户可见的错误消息；5xx 从不泄露协作服务细节
    pub fn user_message(&self) -> String {
        match self {
            WalletError::Validation { .. }
            | WalletError::NotFound { .. }
            | WalletError::MethodNotAllowed { .. } => self.to_string(),
            WalletError::ServiceUnavailable { service, .. } => {
                format!("{service} is not available.")
            }
            WalletError::Storage { .. } => {
                "Failed to process form data or upload to storage.".to_string()
            }
            WalletError::ModelUnavailable { .. } => {
                "An internal error occurred while processing the request.".to_string()
            }
            WalletError::StoreUnavailable { .. } => {
                "An internal error occurred while fetching data.".to_string()
            }
            _ => "An internal error occurred.".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                user: None,
                collection: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.metadata.user = Some(user.to_string());
        self
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.metadata.collection = Some(collection.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &WalletError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;

// === 转换实现 ===

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WalletError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 0, // reqwest 不暴露具体的超时值
            }
        } else if err.is_connect() {
            WalletError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            WalletError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<anyhow::Error> for WalletError {
    fn from(err: anyhow::Error) -> Self {
        WalletError::Internal {
            message: err.to_string(),
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for WalletError {
    fn into_response(self) -> axum::response::Response {
        let status_code = StatusCode::from_u16(self.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({ "error": self.user_message() });

        (status_code, Json(body)).into_response()
    }
}
