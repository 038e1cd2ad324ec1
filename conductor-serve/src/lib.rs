//! HTTP surface for the conductor runtime: webhook ingress plus a
//! `/healthz` liveness probe (axum).
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;

use std::sync::Arc;

use conductor_core::runtime::Runtime;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use app::{router, AppState};

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8088";

/// Runs the HTTP server on an existing listener. Used by tests (bind to
/// 127.0.0.1:0 then pass the listener in).
/// When `once` is true, accepts one connection, handles it, then returns.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    runtime: Arc<Runtime>,
    once: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("webhook server listening on http://{}", addr);
    if once {
        info!("will exit after first connection is done (once mode, used by tests)");
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let state = AppState { runtime };
    let app = router(state);

    if once {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await?;
        info!("connection done, exiting (once mode)");
    } else {
        drop(shutdown_tx);
        axum::serve(listener, app).await?;
    }
    Ok(())
}

/// Runs the HTTP server. Listens on `addr` (default 127.0.0.1:8088).
/// When `once` is true, accepts one connection, handles it, then returns
/// (used by tests and by the CLI's `serve --once`).
pub async fn run_serve(
    addr: Option<&str>,
    runtime: Arc<Runtime>,
    once: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_HTTP_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, runtime, once).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::agent::{Agent, AgentContext, Envelope, HandlerOutput, Keyword};
    use conductor_core::runtime::RuntimeConfig;
    use conductor_core::Result;
    use async_trait::async_trait;
    use std::time::Duration;

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

    #[tokio::test]
    async fn serves_healthz_over_a_real_socket_in_once_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            store_path: dir.path().join("lib.db"),
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

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(run_serve_on_listener(listener, runtime.clone(), true));

        let resp = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        server.await.unwrap().unwrap();
        runtime.shutdown().await;
    }
}
