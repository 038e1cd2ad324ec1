//! Router and shared state for the webhook HTTP surface.
//!
//! Thin transport shim: every check that matters (body size, HMAC
//! signature) lives in `conductor_core::scheduler::webhook` and
//! `conductor_core::scheduler::WebhookRegistry`; this module only extracts
//! the HTTP request and maps the runtime's `Result` back to a status code.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use conductor_core::error::Kind;
use conductor_core::runtime::Runtime;
use serde_json::json;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

/// Builds the router: `POST <webhook_prefix>/:binding` plus a bare
/// `/healthz` liveness probe.
pub fn router(state: AppState) -> Router {
    let prefix = state.runtime.config().webhook_prefix.trim_end_matches('/').to_string();
    let webhook_path = format!("{prefix}/:binding");
    Router::new()
        .route("/healthz", get(healthz))
        .route(&webhook_path, post(handle_webhook))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn status_for(kind: Kind) -> StatusCode {
    match kind {
        Kind::Usage => StatusCode::BAD_REQUEST,
        Kind::NotFound => StatusCode::NOT_FOUND,
        Kind::Agent => StatusCode::UNAUTHORIZED,
        Kind::Capacity => StatusCode::PAYLOAD_TOO_LARGE,
        Kind::Conflict => StatusCode::CONFLICT,
        Kind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Kind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        Kind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(binding): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let result = state
        .runtime
        .webhooks()
        .handle(&binding, &body, signature.as_deref(), state.runtime.workflows())
        .await;

    match result {
        Ok(run_id) => {
            tracing::info!(%binding, %run_id, "webhook accepted, workflow run enqueued");
            (StatusCode::ACCEPTED, Json(json!({ "run_id": run_id.to_string() }))).into_response()
        }
        Err(e) => {
            tracing::warn!(%binding, error = %e, "webhook rejected");
            let status = status_for(e.kind);
            (status, Json(json!({ "error": { "kind": e.kind.as_str(), "message": e.message } }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use conductor_core::agent::{Agent, AgentContext, Envelope, HandlerOutput, Keyword};
    use conductor_core::runtime::RuntimeConfig;
    use conductor_core::scheduler::webhook::{self, WebhookBinding};
    use conductor_core::workflow::{OnError, StepDefinition, WorkflowDefinition};
    use conductor_core::Result;
    use async_trait::async_trait;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Noop;

    #[async_trait]
    impl Agent for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn keywords(&self) -> &[Keyword] {
            &[]
        }
        async fn handle(&self, envelope: Envelope, _ctx: &AgentContext) -> Result<HandlerOutput> {
            Ok(HandlerOutput::new(envelope.inputs))
        }
    }

    async fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            store_path: dir.path().join("serve.db"),
            worker_threads: 2,
            retention_window: Duration::from_secs(3600),
            alert_recipient: "system".into(),
            default_agent: "noop".into(),
            health_window: conductor_core::health::DEFAULT_WINDOW,
            workflow_queue_depth: 16,
            retention_sweep_interval: Duration::from_secs(60),
            webhook_prefix: "/hooks".into(),
        };
        let runtime = Runtime::start(config, vec![Arc::new(Noop)]).await.unwrap();

        let def = WorkflowDefinition {
            name: "hook-wf".into(),
            trigger_agent: "webhook".into(),
            trigger_event: "fire".into(),
            steps: vec![StepDefinition {
                target_agent: "noop".into(),
                action: "go".into(),
                inputs: serde_json::json!({}),
                condition: None,
                on_error: OnError::Fail,
                timeout: None,
            }],
        };
        runtime.workflows().register_definition(def).await.unwrap();
        runtime
            .webhooks()
            .add_binding("foo", WebhookBinding::new("/hooks/foo", "s3cret", "hook-wf"))
            .await
            .unwrap();

        (router(AppState { runtime }), dir)
    }

    #[tokio::test]
    async fn accepts_correctly_signed_request() {
        let (app, _dir) = test_app().await;
        let body = br#"{"x":1}"#;
        let sig = webhook::sign("s3cret", body);
        let req = Request::builder()
            .method("POST")
            .uri("/hooks/foo")
            .header("x-signature", sig)
            .body(Body::from(body.to_vec()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn rejects_bad_signature_with_401() {
        let (app, _dir) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/hooks/foo")
            .header("x-signature", "sha256=deadbeef")
            .body(Body::from(&b"{}"[..]))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_unknown_binding_with_404() {
        let (app, _dir) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/hooks/nope")
            .body(Body::from(&b"{}"[..]))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (app, _dir) = test_app().await;
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
