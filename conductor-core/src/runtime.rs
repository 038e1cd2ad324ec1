//! Top-level wiring: constructs every component over one shared Store and
//! Clock, recovers in-flight workflow runs, and owns the background tasks
//! (retention sweeper, cron scheduler loop) for the life of the process.
//!
//! Generalizes a `run_serve` startup sequence (build state, spawn the
//! server, hand back a shutdown handle) to a richer set of components and
//! two long-running background loops instead of one HTTP listener — the
//! HTTP listener itself lives in the separate `conductor-serve` crate,
//! which is handed the pieces of a [`Runtime`] it needs (the
//! `WebhookRegistry` and `WorkflowEngine`) rather than owning them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::Agent;
use crate::cache::{Cache, FunctionCache};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::messaging::Messaging;
use crate::router::Router;
use crate::scheduler::{CronScheduler, WebhookRegistry};
use crate::state::SharedState;
use crate::store::{ns, SqliteStore, Store};
use crate::workflow::WorkflowEngine;

/// Everything a deployment chooses when starting a runtime. Built by
/// `conductor-config` from env vars, a TOML file, or both; plain data here so
/// `conductor-core` has no dependency on the config crate itself.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub store_path: PathBuf,
    pub worker_threads: usize,
    pub retention_window: Duration,
    pub alert_recipient: String,
    pub default_agent: String,
    pub health_window: Duration,
    pub workflow_queue_depth: usize,
    /// Minimum interval between retention sweeps. This loop must run no
    /// tighter than once a minute; values below that floor are clamped up
    /// in [`Runtime::start`].
    pub retention_sweep_interval: Duration,
    /// Path prefix `conductor-serve` routes webhook requests under (e.g.
    /// `/hooks`, giving `POST /hooks/<binding-name>`). Not used by
    /// `conductor-core` itself; carried here so `conductor-config` has one
    /// settings struct to produce and every surface reads the same value.
    pub webhook_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("conductor.db"),
            worker_threads: num_cpus::get().max(1),
            retention_window: Duration::from_secs(7 * 24 * 3600),
            alert_recipient: "system".to_string(),
            default_agent: "noop".to_string(),
            health_window: crate::health::DEFAULT_WINDOW,
            workflow_queue_depth: crate::workflow::DEFAULT_QUEUE_DEPTH,
            retention_sweep_interval: Duration::from_secs(60),
            webhook_prefix: "/hooks".to_string(),
        }
    }
}

const MIN_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn system_ns() -> crate::store::Namespace {
    ns(&["system"])
}

/// A running process: every coordination service, wired over one Store, plus
/// the two background loops (retention sweep, cron) and a process-wide
/// identity stamped fresh at every start.
pub struct Runtime {
    pub process_id: Uuid,
    started_at: std::time::SystemTime,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    messages: Arc<Messaging>,
    state: Arc<SharedState>,
    health: Arc<HealthMonitor>,
    cache: Arc<dyn Cache>,
    router: Arc<Router>,
    workflows: Arc<WorkflowEngine>,
    cron: Arc<CronScheduler>,
    webhooks: Arc<WebhookRegistry>,
    config: RuntimeConfig,
    background_cancel: CancellationToken,
    background_tasks: AsyncMutex<Option<JoinSet<()>>>,
}

impl Runtime {
    /// Builds every component, recovers any workflow runs left `running` by
    /// a prior process incarnation, and spawns the retention sweeper and
    /// cron scheduler loop. Returns an `Arc<Runtime>` since the background
    /// tasks and every component hold a clone of the services they need,
    /// not a reference back into this struct.
    pub async fn start(config: RuntimeConfig, agents: Vec<Arc<dyn Agent>>) -> Result<Arc<Runtime>> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(&config.store_path)?);

        let process_id = Uuid::new_v4();
        let started_at = clock.now_wall();
        store
            .put(
                &system_ns(),
                "process_id",
                &serde_json::json!({
                    "process_id": process_id.to_string(),
                    "started_at_millis": crate::clock::system_time_to_millis(started_at),
                }),
                None,
            )
            .await?;
        tracing::info!(%process_id, "runtime starting");

        let messages = Arc::new(Messaging::new(store.clone(), clock.clone()));
        let state = Arc::new(SharedState::new(store.clone(), clock.clone()));
        let health = Arc::new(HealthMonitor::new(
            store.clone(),
            clock.clone(),
            messages.clone(),
            config.alert_recipient.clone(),
        ));
        let cache: Arc<dyn Cache> = Arc::new(FunctionCache::new(store.clone(), clock.clone()));

        let router = Arc::new(Router::new(agents.clone(), config.default_agent.clone())?);

        let workflows = Arc::new(
            WorkflowEngine::new(
                store.clone(),
                clock.clone(),
                health.clone(),
                messages.clone(),
                state.clone(),
                cache.clone(),
                agents,
                config.worker_threads,
            )
            .with_queue_depth_limit(config.workflow_queue_depth),
        );
        let recovered = workflows.recover().await?;
        if recovered > 0 {
            tracing::info!(recovered, "resumed in-flight workflow runs from a prior process");
        }

        let cron = Arc::new(CronScheduler::new(store.clone(), clock.clone(), workflows.clone()));
        let webhooks = Arc::new(WebhookRegistry::new(store.clone(), clock.clone()));

        let background_cancel = CancellationToken::new();
        let mut background_tasks = JoinSet::new();

        background_tasks.spawn(cron.clone().run(background_cancel.clone()));

        let sweep_interval = config.retention_sweep_interval.max(MIN_RETENTION_SWEEP_INTERVAL);
        background_tasks.spawn(retention_sweep_loop(
            messages.clone(),
            router.clone(),
            config.retention_window,
            sweep_interval,
            background_cancel.clone(),
        ));

        let runtime = Runtime {
            process_id,
            started_at,
            clock,
            store,
            messages,
            state,
            health,
            cache,
            router,
            workflows,
            cron,
            webhooks,
            config,
            background_cancel,
            background_tasks: AsyncMutex::new(Some(background_tasks)),
        };
        Ok(Arc::new(runtime))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn messages(&self) -> &Arc<Messaging> {
        &self.messages
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    pub fn cron(&self) -> &Arc<CronScheduler> {
        &self.cron
    }

    pub fn webhooks(&self) -> &Arc<WebhookRegistry> {
        &self.webhooks
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn started_at(&self) -> std::time::SystemTime {
        self.started_at
    }

    /// Signals every background task to stop and waits for them to finish,
    /// so nothing races the Store's teardown (e.g. the caller dropping the
    /// last `Arc<dyn Store>` and closing the underlying connections).
    pub async fn shutdown(&self) {
        self.background_cancel.cancel();
        let mut guard = self.background_tasks.lock().await;
        if let Some(mut tasks) = guard.take() {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "background task panicked during shutdown");
                }
            }
        }
        tracing::info!(process_id = %self.process_id, "runtime shut down");
    }
}

async fn retention_sweep_loop(
    messages: Arc<Messaging>,
    router: Arc<Router>,
    retention_window: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        for info in router.list_agents() {
            match messages.sweep_recipient(&info.name, retention_window).await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(agent = %info.name, removed, "swept acknowledged messages");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(agent = %info.name, error = %e, "retention sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, Envelope, HandlerOutput, Keyword};
    use async_trait::async_trait;

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

    fn test_config(dir: &tempfile::TempDir) -> RuntimeConfig {
        RuntimeConfig {
            store_path: dir.path().join("runtime.db"),
            worker_threads: 2,
            retention_window: Duration::from_secs(3600),
            alert_recipient: "system".into(),
            default_agent: "noop".into(),
            health_window: crate::health::DEFAULT_WINDOW,
            workflow_queue_depth: 16,
            retention_sweep_interval: Duration::from_secs(60),
            webhook_prefix: "/hooks".to_string(),
        }
    }

    #[tokio::test]
    async fn start_wires_components_and_stamps_a_process_id() {
        let dir = tempfile::tempdir().unwrap();
        let noop: Arc<dyn Agent> = Arc::new(Noop);
        let runtime = Runtime::start(test_config(&dir), vec![noop]).await.unwrap();

        assert_eq!(runtime.router().list_agents().len(), 1);
        let stored = runtime
            .store()
            .get(&system_ns(), "process_id", runtime.clock().now_wall())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value["process_id"], serde_json::json!(runtime.process_id.to_string()));

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_joins_background_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let noop: Arc<dyn Agent> = Arc::new(Noop);
        let runtime = Runtime::start(test_config(&dir), vec![noop]).await.unwrap();
        runtime.shutdown().await;
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn restart_over_the_same_store_recovers_running_workflow_runs() {
        use crate::workflow::{OnError, StepDefinition, WorkflowDefinition};

        let dir = tempfile::tempdir().unwrap();
        let noop: Arc<dyn Agent> = Arc::new(Noop);
        let runtime = Runtime::start(test_config(&dir), vec![noop.clone()]).await.unwrap();

        let def = WorkflowDefinition {
            name: "restart-me".into(),
            trigger_agent: "test".into(),
            trigger_event: "go".into(),
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
        let run_id = runtime.workflows().trigger_named("restart-me", serde_json::json!({})).await.unwrap();

        for _ in 0..50 {
            let run = runtime.workflows().status(run_id).await.unwrap();
            if run.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runtime.shutdown().await;

        let runtime2 = Runtime::start(test_config(&dir), vec![noop]).await.unwrap();
        let run = runtime2.workflows().status(run_id).await.unwrap();
        assert_eq!(run.state, crate::workflow::RunState::Succeeded);
        runtime2.shutdown().await;
    }
}
