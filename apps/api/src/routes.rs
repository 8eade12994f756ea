use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde_json::json;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, info};
use wallet_core::{
    AssistantRequest, AssistantResponse, ConversationContext, IngestResponse,
    QueryRecordsRequest, QueryRecordsResponse, ReceiptUpload, TimeRangeSelector,
};
use wallet_engine::{validate_upload, ServiceContext};
use wallet_error::{ErrorMetadataBuilder, Result, WalletError};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServiceContext>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query-records", endpoint(post(query_records)))
        .route("/query-assistant", endpoint(post(query_assistant)))
        .route(
            "/ingest-receipt",
            endpoint(post(ingest_receipt)).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/health", get(health))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
}

/// POST 端点：附带 CORS 预检，其余方法返回 405
fn endpoint(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.options(preflight).fallback(method_not_allowed)
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "3600"),
        ],
    )
}

async fn method_not_allowed(method: Method) -> WalletError {
    WalletError::MethodNotAllowed {
        method: method.to_string(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn report(err: WalletError, meta: ErrorMetadataBuilder) -> WalletError {
    err.log(&meta.build(&err));
    err
}

fn invalid_json(rejection: JsonRejection) -> WalletError {
    debug!(rejection = %rejection.body_text(), "json body rejected");
    WalletError::validation("Invalid JSON")
}

// ===============
// query-records
// ===============

async fn query_records(
    State(state): State<AppState>,
    body: std::result::Result<Json<QueryRecordsRequest>, JsonRejection>,
) -> Result<Json<QueryRecordsResponse>> {
    let meta = ErrorMetadataBuilder::new("api").operation("query_records");
    let Json(req) = body.map_err(|r| report(invalid_json(r), meta))?;
    let collection = req.collection.clone().unwrap_or_default();
    let meta = || {
        ErrorMetadataBuilder::new("api")
            .operation("query_records")
            .collection(&collection)
    };

    let data = run_query_records(&state, &req)
        .await
        .map_err(|e| report(e, meta()))?;
    Ok(Json(QueryRecordsResponse { data }))
}

async fn run_query_records(
    state: &AppState,
    req: &QueryRecordsRequest,
) -> Result<Vec<serde_json::Value>> {
    let collection = req
        .collection
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            WalletError::validation("Missing 'collection' or 'time_range' in request body")
        })?;
    let selector = TimeRangeSelector::parse(
        req.time_range.as_deref(),
        req.query_type.as_deref(),
        req.start_date.as_deref(),
        req.end_date.as_deref(),
        req.count,
        state.ctx.max_last_n(),
    )?;
    state
        .ctx
        .record_query()?
        .execute(collection, &selector)
        .await
}

// ===============
// query-assistant
// ===============

async fn query_assistant(
    State(state): State<AppState>,
    body: std::result::Result<Json<AssistantRequest>, JsonRejection>,
) -> Result<Json<AssistantResponse>> {
    let meta = || ErrorMetadataBuilder::new("api").operation("query_assistant");
    let Json(req) = body.map_err(|r| report(invalid_json(r), meta()))?;

    let ctx = ConversationContext::from_request(req);
    if ctx.query.trim().is_empty() {
        return Err(report(
            WalletError::validation("Missing 'user_query' in request body"),
            meta(),
        ));
    }

    let reply = async { state.ctx.assistant()?.answer(&ctx).await }
        .await
        .map_err(|e| {
            report(
                e,
                meta().context("history_turns", &ctx.history.len().to_string()),
            )
        })?;
    Ok(Json(AssistantResponse { reply }))
}

// ===============
// ingest-receipt
// ===============

async fn ingest_receipt(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestResponse>> {
    let meta = || ErrorMetadataBuilder::new("api").operation("ingest_receipt");
    let upload = match multipart {
        Ok(multipart) => read_upload(multipart).await,
        Err(rejection) => {
            debug!(rejection = %rejection.body_text(), "multipart body rejected");
            Err(WalletError::validation("Missing 'file' in form data"))
        }
    }
    .and_then(validate_upload)
    .map_err(|e| report(e, meta()))?;

    let user = upload.user().to_string();
    info!(user = %user, file = %upload.stored_name(), "receipt received");

    let outcome = async { state.ctx.ingestion()?.ingest_validated(upload).await }
        .await
        .map_err(|e| report(e, meta().user(&user)))?;
    Ok(Json(IngestResponse::from_record(
        outcome.record,
        &outcome.stored_name,
    )))
}

async fn read_upload(mut multipart: Multipart) -> Result<ReceiptUpload> {
    let mut upload = ReceiptUpload::default();
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                upload.filename = field.file_name().map(str::to_string);
                upload.content_type = field.content_type().map(str::to_string);
                upload.file_bytes = Some(field.bytes().await.map_err(form_error)?.to_vec());
            }
            // `timestamp` 为旧版客户端使用的字段名
            "transaction_time" | "timestamp" => {
                upload.transaction_time = Some(text(field).await?);
            }
            "user" => upload.user = Some(text(field).await?),
            other => debug!(field = other, "ignoring form field"),
        }
    }
    Ok(upload)
}

async fn text(field: Field<'_>) -> Result<String> {
    field.text().await.map_err(form_error)
}

fn form_error(err: axum::extract::multipart::MultipartError) -> WalletError {
    debug!(error = %err.body_text(), "malformed form data");
    WalletError::validation("Invalid form data")
}
