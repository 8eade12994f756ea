use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use wallet_engine::{parse_document_subject, ServiceContext, TriggerOutcome};
use wallet_error::{ErrorMetadataBuilder, Result, WalletError};

/// Eventarc HTTP 投递时携带的事件主题头
const SUBJECT_HEADER: &str = "ce-subject";

pub fn router(ctx: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/", post(on_document_created))
        .route("/health", get(health))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn on_document_created(
    State(ctx): State<Arc<ServiceContext>>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let meta = || ErrorMetadataBuilder::new("worker").operation("on_document_created");
    let subject = headers
        .get(SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let event_id = headers
        .get("ce-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    let (collection, id) = parse_document_subject(subject).map_err(|e| {
        e.log(&meta().context("subject", subject).build(&e));
        e
    })?;

    let outcome = async { ctx.status_trigger()?.on_record_created(&collection, &id).await }
        .await
        .map_err(|e: WalletError| {
            e.log(
                &meta()
                    .collection(&collection)
                    .context("document_id", &id)
                    .context("event_id", event_id)
                    .build(&e),
            );
            e
        })?;
    if outcome == TriggerOutcome::Applied {
        info!(%collection, %id, event_id, "record status updated");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use wallet_core::SystemClock;
    use wallet_engine::{LazyCollaborator, ServiceConfig};
    use wallet_llm::Providers;
    use wallet_store::{
        BlobStore, Document, DocumentStore, FieldValue, Fields, MemoryBlobStore,
        MemoryDocumentStore,
    };

    fn context(docs: MemoryDocumentStore) -> Arc<ServiceContext> {
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "firestore": {"kind": "memory"},
            "storage": {"kind": "memory", "bucket": "wallet-images"},
            "model": {"kind": "vertex", "model": "gemini-2.5-flash-lite"}
        }))
        .unwrap();
        let models: LazyCollaborator<Providers> =
            LazyCollaborator::new("Language model", || panic!("worker never uses a model"));
        Arc::new(ServiceContext::with_collaborators(
            config,
            Arc::new(SystemClock),
            LazyCollaborator::ready("Firestore client", Arc::new(docs) as Arc<dyn DocumentStore>),
            LazyCollaborator::ready(
                "Storage client",
                Arc::new(MemoryBlobStore::new("wallet-images")) as Arc<dyn BlobStore>,
            ),
            models,
        ))
    }

    fn event(subject: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("ce-id", "evt-1")
            .header("ce-type", "google.cloud.firestore.document.v1.created")
            .header("ce-subject", subject)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_created_record_is_marked_pending() {
        let docs = MemoryDocumentStore::new();
        let mut fields = Fields::new();
        fields.insert("user".into(), FieldValue::from("alice"));
        docs.insert(
            "transactions",
            Document {
                id: "abc".into(),
                fields,
            },
        )
        .await;

        let resp = router(context(docs.clone()))
            .oneshot(event("documents/transactions/abc"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let doc = docs.get("transactions", "abc").await.unwrap();
        assert_eq!(doc.get("status"), Some(&FieldValue::from("pending")));
        assert_eq!(doc.get("user"), Some(&FieldValue::from("alice")));
    }

    #[tokio::test]
    async fn test_unwatched_collection_is_acknowledged() {
        let docs = MemoryDocumentStore::new();
        let resp = router(context(docs.clone()))
            .oneshot(event("documents/users/u1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(docs.get("users", "u1").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_subject_is_400() {
        let resp = router(context(MemoryDocumentStore::new()))
            .oneshot(event("projects/p/databases/(default)"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
