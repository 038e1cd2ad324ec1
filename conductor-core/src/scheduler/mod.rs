//! Two trigger surfaces that fan into the Workflow Engine: cron-driven jobs
//! and webhook-bound bindings. Both produce the same `{agent, event,
//! payload}` trigger event shape consumed by
//! [`crate::workflow::WorkflowEngine::trigger_event`].
//!
//! The webhook surface's HTTP transport (listening socket, request parsing,
//! header extraction) lives in the separate `conductor-serve` crate; this
//! module owns the binding registry, signature verification, and body-size
//! enforcement so `conductor-serve` stays a thin transport shim over it.

pub mod cron_expr;
pub mod webhook;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::clock::{millis_to_system_time, system_time_to_millis, Clock};
use crate::error::{Result, RuntimeError};
use crate::store::{ns, Namespace, Store};
use crate::workflow::{template, WorkflowEngine};
use cron_expr::Schedule;
use webhook::WebhookBinding;

fn cron_ns() -> Namespace {
    ns(&["cron"])
}

fn webhook_ns() -> Namespace {
    ns(&["webhooks", "bindings"])
}

/// A registered cron job, as persisted in the Store. `expression` is kept
/// alongside the parsed `Schedule` is NOT stored (re-parsed on load) since
/// [`Schedule`] has no stable serialized form of its own and re-parsing a
/// validated expression is cheap and infallible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    pub expression: String,
    pub target_agent: String,
    pub target_event: String,
    pub payload_template: Value,
    pub enabled: bool,
    pub last_run_millis: Option<i64>,
    pub next_run_millis: i64,
}

impl CronJob {
    fn schedule(&self) -> Result<Schedule> {
        cron_expr::parse(&self.expression)
    }
}

/// Cron-driven trigger surface: validates and persists job definitions, and
/// runs the single scheduler loop that wakes at `min(next_run)`, fires every
/// job whose `next_run` has arrived, and recomputes each fired job's
/// `next_run` strictly after the firing time.
pub struct CronScheduler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    engine: Arc<WorkflowEngine>,
}

impl CronScheduler {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, engine: Arc<WorkflowEngine>) -> Self {
        Self { store, clock, engine }
    }

    /// Validates `expression` (`usage` error on malformed syntax) and
    /// persists a new, enabled job targeting `(target_agent,
    /// target_event)`.
    pub async fn add_job(
        &self,
        expression: &str,
        target_agent: &str,
        target_event: &str,
        payload_template: Value,
    ) -> Result<Uuid> {
        let schedule = cron_expr::parse(expression)?;
        let now = self.clock.now_wall();
        let next_run = cron_expr::next_run(&schedule, now, None)?;

        let job = CronJob {
            id: Uuid::new_v4(),
            expression: expression.to_string(),
            target_agent: target_agent.to_string(),
            target_event: target_event.to_string(),
            payload_template,
            enabled: true,
            last_run_millis: None,
            next_run_millis: system_time_to_millis(next_run),
        };
        self.store
            .put(&cron_ns(), &job.id.to_string(), &serde_json::to_value(&job)?, None)
            .await?;
        Ok(job.id)
    }

    pub async fn remove_job(&self, job_id: Uuid) -> Result<()> {
        let existed = self.store.delete(&cron_ns(), &job_id.to_string()).await?;
        if !existed {
            return Err(RuntimeError::not_found(format!("cron job '{job_id}' not found")));
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<(CronJob, i64)> {
        let now = self.clock.now_wall();
        let stored = self
            .store
            .get(&cron_ns(), &job_id.to_string(), now)
            .await?
            .ok_or_else(|| RuntimeError::not_found(format!("cron job '{job_id}' not found")))?;
        Ok((serde_json::from_value(stored.value)?, stored.version))
    }

    async fn set_enabled(&self, job_id: Uuid, enabled: bool) -> Result<()> {
        let (mut job, version) = self.get_job(job_id).await?;
        job.enabled = enabled;
        self.store.cas(&cron_ns(), &job_id.to_string(), version, &serde_json::to_value(&job)?).await?;
        Ok(())
    }

    pub async fn enable(&self, job_id: Uuid) -> Result<()> {
        self.set_enabled(job_id, true).await
    }

    pub async fn disable(&self, job_id: Uuid) -> Result<()> {
        self.set_enabled(job_id, false).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<CronJob>> {
        let now = self.clock.now_wall();
        let rows = self.store.scan(&cron_ns(), None, now).await?;
        rows.into_iter()
            .map(|(_, stored)| Ok(serde_json::from_value(stored.value)?))
            .collect()
    }

    /// Fires every enabled job whose `next_run` is `<= now`, triggering its
    /// bound workflow, then recomputes `next_run` strictly after the firing
    /// time. A job that was overdue by more than one interval (the process
    /// was asleep) still fires exactly once per call — late firings are
    /// coalesced, not replayed per missed tick.
    async fn tick(&self, now: SystemTime) -> Result<usize> {
        let now_millis = system_time_to_millis(now);
        let mut fired = 0;
        for job in self.list_jobs().await? {
            if !job.enabled || job.next_run_millis > now_millis {
                continue;
            }
            let (mut job, version) = self.get_job(job.id).await?;
            if !job.enabled || job.next_run_millis > now_millis {
                continue; // raced with a concurrent disable/requeue
            }

            let vars = json!({ "job": { "id": job.id.to_string(), "fired_at_millis": now_millis } });
            let payload = template::expand_value(&job.payload_template, &vars);
            if let Err(e) = self.engine.trigger_event(&job.target_agent, &job.target_event, payload).await {
                tracing::warn!(job_id = %job.id, error = %e, "cron-triggered workflow failed to enqueue");
            }

            job.last_run_millis = Some(now_millis);
            let schedule = job.schedule()?;
            let next = cron_expr::next_run(&schedule, millis_to_system_time(now_millis), None)?;
            job.next_run_millis = system_time_to_millis(next);
            self.store.cas(&cron_ns(), &job.id.to_string(), version, &serde_json::to_value(&job)?).await?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Runs the scheduler loop until `cancel` fires: sleeps until the
    /// soonest `next_run` across all jobs (or a bounded poll interval if
    /// there are none yet), then fires every job whose time has come.
    pub async fn run(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let sleep_for = match self.list_jobs().await {
                Ok(jobs) => {
                    let now_millis = system_time_to_millis(self.clock.now_wall());
                    jobs.iter()
                        .filter(|j| j.enabled)
                        .map(|j| (j.next_run_millis - now_millis).max(0))
                        .min()
                        .map(|ms| Duration::from_millis(ms as u64))
                        .unwrap_or(Duration::from_secs(1))
                        .min(Duration::from_secs(1))
                }
                Err(_) => Duration::from_secs(1),
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }

            let now = self.clock.now_wall();
            if let Err(e) = self.tick(now).await {
                tracing::warn!(error = %e, "cron scheduler tick failed");
            }
        }
    }
}

/// Webhook-driven trigger surface: a registry of named bindings (persisted
/// in the Store) plus the signature/size checks every inbound request must
/// pass before any side effect runs.
pub struct WebhookRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl WebhookRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn add_binding(&self, name: &str, binding: WebhookBinding) -> Result<()> {
        self.store
            .put(&webhook_ns(), name, &serde_json::to_value(&binding)?, None)
            .await
    }

    pub async fn remove_binding(&self, name: &str) -> Result<()> {
        let existed = self.store.delete(&webhook_ns(), name).await?;
        if !existed {
            return Err(RuntimeError::not_found(format!("webhook binding '{name}' not found")));
        }
        Ok(())
    }

    pub async fn get_binding(&self, name: &str) -> Result<WebhookBinding> {
        let now = self.clock.now_wall();
        let stored = self
            .store
            .get(&webhook_ns(), name, now)
            .await?
            .ok_or_else(|| RuntimeError::not_found(format!("webhook binding '{name}' not found")))?;
        Ok(serde_json::from_value(stored.value)?)
    }

    pub async fn list_bindings(&self) -> Result<Vec<(String, WebhookBinding)>> {
        let now = self.clock.now_wall();
        let rows = self.store.scan(&webhook_ns(), None, now).await?;
        rows.into_iter()
            .map(|(name, stored)| Ok((name, serde_json::from_value(stored.value)?)))
            .collect()
    }

    /// Validates an inbound request against a named binding (body size,
    /// then signature if the binding has a secret) and, on success,
    /// triggers the bound workflow with the raw body parsed as JSON (or, if
    /// it does not parse, carried as a base64 string under `"body"` so
    /// `application/octet-stream` payloads are still representable as a
    /// trigger payload). Body-size is checked before signature verification
    /// so an oversize request is rejected before any other work is done.
    pub async fn handle(
        &self,
        binding_name: &str,
        body: &[u8],
        signature_header: Option<&str>,
        engine: &Arc<WorkflowEngine>,
    ) -> Result<Uuid> {
        let binding = self.get_binding(binding_name).await?;
        webhook::check_body_size(&binding, body.len())?;

        if !binding.secret.is_empty() {
            let header = signature_header.ok_or_else(|| RuntimeError::agent("missing X-Signature header"))?;
            webhook::verify(&binding.secret, body, header)?;
        }

        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(v) => v,
            Err(_) => json!({ "body_base64": data_encoding_base64(body) }),
        };

        engine.trigger_named(&binding.target_workflow, payload).await
    }
}

/// Minimal base64 encode for the octet-stream fallback payload, avoiding a
/// dedicated base64 crate dependency for one narrow case.
fn data_encoding_base64(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(b2 & 0x3f) as usize] as char } else { '=' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentContext, Envelope, HandlerOutput, Keyword};
    use crate::cache::{Cache, NullCache};
    use crate::clock::{FakeClock, SystemClock};
    use crate::health::HealthMonitor;
    use crate::messaging::Messaging;
    use crate::state::SharedState;
    use crate::workflow::{OnError, StepDefinition, WorkflowDefinition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn keywords(&self) -> &[Keyword] {
            &[]
        }
        async fn handle(&self, envelope: Envelope, _ctx: &AgentContext) -> Result<HandlerOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerOutput::new(envelope.inputs))
        }
    }

    fn harness() -> (Arc<WorkflowEngine>, Arc<dyn Store>, Arc<dyn Clock>, tempfile::TempDir, Arc<AtomicU32>) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(crate::store::SqliteStore::new(dir.path().join("s.db")).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let messages = Arc::new(Messaging::new(store.clone(), clock.clone()));
        let state = Arc::new(SharedState::new(store.clone(), clock.clone()));
        let health = Arc::new(HealthMonitor::new(store.clone(), clock.clone(), messages.clone(), "system"));
        let cache: Arc<dyn Cache> = Arc::new(NullCache);
        let calls = Arc::new(AtomicU32::new(0));
        let echo: Arc<dyn Agent> = Arc::new(Echo { calls: calls.clone() });
        let engine = Arc::new(WorkflowEngine::new(store.clone(), clock.clone(), health, messages, state, cache, vec![echo], 4));
        (engine, store, clock, dir, calls)
    }

    #[tokio::test]
    async fn add_job_rejects_invalid_expression() {
        let (engine, store, clock, _dir, _calls) = harness();
        let scheduler = CronScheduler::new(store, clock, engine);
        let err = scheduler.add_job("not a cron", "cron", "tick", json!({})).await.unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::Usage);
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_and_advances_next_run() {
        let (engine, store, clock, _dir, calls) = harness();
        let def = WorkflowDefinition {
            name: "cron-wf".into(),
            trigger_agent: "cron".into(),
            trigger_event: "tick".into(),
            steps: vec![StepDefinition {
                target_agent: "echo".into(),
                action: "go".into(),
                inputs: json!({}),
                condition: None,
                on_error: OnError::Fail,
                timeout: None,
            }],
        };
        engine.register_definition(def).await.unwrap();

        let fake = Arc::new(FakeClock::new());
        let scheduler = CronScheduler::new(store, fake.clone() as Arc<dyn Clock>, engine);
        let job_id = scheduler.add_job("@every 1m", "cron", "tick", json!({})).await.unwrap();

        fake.advance(Duration::from_secs(61));
        let fired = scheduler.tick(fake.now_wall()).await.unwrap();
        assert_eq!(fired, 1);

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let job = scheduler.list_jobs().await.unwrap().into_iter().find(|j| j.id == job_id).unwrap();
        assert!(job.last_run_millis.is_some());
        assert!(job.next_run_millis > system_time_to_millis(fake.now_wall()));
    }

    #[tokio::test]
    async fn disabled_job_never_fires() {
        let (engine, store, clock, _dir, calls) = harness();
        let fake = Arc::new(FakeClock::new());
        let scheduler = CronScheduler::new(store, fake.clone() as Arc<dyn Clock>, engine);
        let job_id = scheduler.add_job("@every 1s", "cron", "tick", json!({})).await.unwrap();
        scheduler.disable(job_id).await.unwrap();

        fake.advance(Duration::from_secs(5));
        let fired = scheduler.tick(fake.now_wall()).await.unwrap();
        assert_eq!(fired, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let _ = clock;
    }

    #[tokio::test]
    async fn webhook_handle_rejects_bad_signature_and_accepts_good_one() {
        let (engine, store, clock, _dir, calls) = harness();
        let def = WorkflowDefinition {
            name: "hook-wf".into(),
            trigger_agent: "webhook".into(),
            trigger_event: "fire".into(),
            steps: vec![StepDefinition {
                target_agent: "echo".into(),
                action: "go".into(),
                inputs: json!({}),
                condition: None,
                on_error: OnError::Fail,
                timeout: None,
            }],
        };
        engine.register_definition(def).await.unwrap();

        let registry = WebhookRegistry::new(store, clock);
        registry
            .add_binding("foo", WebhookBinding::new("/hook/foo", "s3cret", "hook-wf"))
            .await
            .unwrap();

        let body = br#"{"x":1}"#;
        let bad = registry.handle("foo", body, Some("sha256=deadbeef"), &engine).await;
        assert!(bad.is_err());

        let sig = webhook::sign("s3cret", body);
        let run_id = registry.handle("foo", body, Some(&sig), &engine).await.unwrap();
        let run = engine.status(run_id).await.unwrap();
        assert_eq!(run.trigger_payload, json!({"x": 1}));
        let _ = calls;
    }

    #[tokio::test]
    async fn webhook_handle_rejects_oversize_body_before_signature_check() {
        let (engine, store, clock, _dir, _calls) = harness();
        let registry = WebhookRegistry::new(store, clock);
        registry
            .add_binding("small", WebhookBinding::new("/hook/small", "", "nope").with_max_body_bytes(4))
            .await
            .unwrap();
        let err = registry.handle("small", b"too-long-body", None, &engine).await.unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::Capacity);
    }

    #[tokio::test]
    async fn unknown_binding_is_not_found() {
        let (engine, store, clock, _dir, _calls) = harness();
        let registry = WebhookRegistry::new(store, clock);
        let err = registry.handle("nope", b"{}", None, &engine).await.unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::NotFound);
    }
}
