//! Declarative step graphs: definition language, template expansion,
//! condition evaluation, per-step health tracking, and resumable runs.
//!
//! Generalizes a `Runtime<C, S>` shape — one that threads accumulated state
//! (`previous`) between node executions — from a compile-time Rust node
//! graph to a declarative, data-driven step list loaded from the Store at
//! trigger time. A [`WorkflowRun`] plays the role a per-invocation `Runtime`
//! plays: it threads `vars` between step executions the way `previous`
//! threads state between node executions.

pub mod condition;
pub mod template;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, Envelope};
use crate::cache::Cache;
use crate::clock::{fingerprint, system_time_to_millis, Clock};
use crate::error::{Result, RuntimeError};
use crate::health::HealthMonitor;
use crate::messaging::Messaging;
use crate::state::SharedState;
use crate::store::{ns, Namespace, Store};

/// What happens when a step's agent invocation returns an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnError {
    Fail,
    Continue,
    Retry {
        max_attempts: u32,
        backoff: Backoff,
        base_delay: Duration,
    },
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Fail
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Constant,
    Exponential,
}

fn delay_for(backoff: Backoff, base_delay: Duration, attempt: u32) -> Duration {
    match backoff {
        Backoff::Constant => base_delay,
        Backoff::Exponential => base_delay.saturating_mul(1u32 << attempt.min(16)),
    }
}

/// One step in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub target_agent: String,
    pub action: String,
    #[serde(default)]
    pub inputs: Value,
    pub condition: Option<String>,
    #[serde(default)]
    pub on_error: OnError,
    pub timeout: Option<Duration>,
}

/// A named, trigger-bound sequence of steps. Loaded from the Store at
/// trigger time; definitions are immutable once registered (re-registering
/// the same name overwrites it, matching the Store's upsert semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub trigger_agent: String,
    pub trigger_event: String,
    pub steps: Vec<StepDefinition>,
}

fn definitions_ns() -> Namespace {
    ns(&["workflows", "definitions"])
}

fn runs_ns() -> Namespace {
    ns(&["workflows", "runs"])
}

/// A run's lifecycle. `Succeeded`, `Failed`, and `Cancelled` are terminal;
/// `step_cursor` and `state` only ever advance, never roll back (P7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub definition_name: String,
    pub trigger_payload: Value,
    pub state: RunState,
    pub step_cursor: usize,
    pub attempt_counts: Vec<u32>,
    pub vars: Value,
    pub started_at_millis: i64,
    pub ended_at_millis: Option<i64>,
}

/// Filter passed to [`WorkflowEngine::list`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub definition_name: Option<String>,
    pub state: Option<RunState>,
}

/// Default depth beyond which [`WorkflowEngine::trigger`] rejects new runs
/// with a `capacity` error.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Declarative step graph executor. Holds the same injected services every
/// agent gets (`messages`, `state`, `cache`) plus the Health Monitor (for
/// per-step tracking) and the registered agent table (for step dispatch by
/// name, bypassing router scoring since a step already names its target).
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    health: Arc<HealthMonitor>,
    agents: HashMap<String, Arc<dyn Agent>>,
    ctx: AgentContext,
    step_permits: Arc<tokio::sync::Semaphore>,
    queue_depth_limit: usize,
    cancels: DashMap<Uuid, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        health: Arc<HealthMonitor>,
        messages: Arc<Messaging>,
        state: Arc<SharedState>,
        cache: Arc<dyn Cache>,
        agents: Vec<Arc<dyn Agent>>,
        worker_threads: usize,
    ) -> Self {
        Self {
            store,
            clock,
            health,
            agents: agents.into_iter().map(|a| (a.name().to_string(), a)).collect(),
            ctx: AgentContext { messages, state, cache },
            step_permits: Arc::new(tokio::sync::Semaphore::new(worker_threads.max(1))),
            queue_depth_limit: DEFAULT_QUEUE_DEPTH,
            cancels: DashMap::new(),
        }
    }

    pub fn with_queue_depth_limit(mut self, limit: usize) -> Self {
        self.queue_depth_limit = limit;
        self
    }

    /// Validates and persists a workflow definition. Validation covers
    /// template well-formedness in every step's `inputs`, condition
    /// parseability, and the one cycle this revision guards against cheaply:
    /// a step whose action is literally `call_workflow` targeting its own
    /// definition's name (direct self-recursion).
    pub async fn register_definition(&self, def: WorkflowDefinition) -> Result<()> {
        if def.steps.is_empty() {
            return Err(RuntimeError::usage(format!("workflow '{}' has no steps", def.name)));
        }
        for (i, step) in def.steps.iter().enumerate() {
            template::validate_inputs(&step.inputs)
                .map_err(|e| RuntimeError::usage(format!("workflow '{}' step {i}: {e}", def.name)))?;
            if let Some(cond) = &step.condition {
                condition::parse(cond).map_err(|e| RuntimeError::usage(format!("workflow '{}' step {i} condition: {e}", def.name)))?;
            }
            if step.action == "call_workflow" {
                if let Some(target) = step.inputs.get("workflow").and_then(Value::as_str) {
                    if target == def.name {
                        return Err(RuntimeError::usage(format!(
                            "workflow '{}' step {i} calls itself directly (unsupported recursion)",
                            def.name
                        )));
                    }
                }
            }
        }
        self.store
            .put(&definitions_ns(), &def.name, &serde_json::to_value(&def)?, None)
            .await?;
        Ok(())
    }

    pub async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition> {
        let now = self.clock.now_wall();
        let stored = self
            .store
            .get(&definitions_ns(), name, now)
            .await?
            .ok_or_else(|| RuntimeError::not_found(format!("workflow '{name}' not registered")))?;
        Ok(serde_json::from_value(stored.value)?)
    }

    async fn find_definition_for_event(&self, agent: &str, event: &str) -> Result<WorkflowDefinition> {
        let now = self.clock.now_wall();
        let rows = self.store.scan(&definitions_ns(), None, now).await?;
        for (_, stored) in rows {
            if let Ok(def) = serde_json::from_value::<WorkflowDefinition>(stored.value) {
                if def.trigger_agent == agent && def.trigger_event == event {
                    return Ok(def);
                }
            }
        }
        Err(RuntimeError::not_found(format!(
            "no workflow bound to trigger ({agent}, {event})"
        )))
    }

    async fn queued_count(&self) -> Result<usize> {
        let now = self.clock.now_wall();
        let rows = self.store.scan(&runs_ns(), None, now).await?;
        let mut n = 0;
        for (_, stored) in rows {
            if let Ok(run) = serde_json::from_value::<WorkflowRun>(stored.value) {
                if !run.state.is_terminal() {
                    n += 1;
                }
            }
        }
        Ok(n)
    }

    /// Resolves `(agent, event)` to a registered workflow definition, then
    /// triggers it. This is the `trigger_event` shape the scheduler and
    /// webhook surfaces both produce.
    pub async fn trigger_event(self: &Arc<Self>, agent: &str, event: &str, payload: Value) -> Result<Uuid> {
        let def = self.find_definition_for_event(agent, event).await?;
        self.trigger_named(&def.name, payload).await
    }

    /// Triggers a workflow by name directly (used by `conductor-cli` and by
    /// callers that already know the target workflow). Synchronous enqueue:
    /// the run is durably created and its `run_id` returned before any step
    /// executes; execution proceeds in the background worker pool.
    pub async fn trigger_named(self: &Arc<Self>, name: &str, payload: Value) -> Result<Uuid> {
        let def = self.get_definition(name).await?;
        if self.queued_count().await? >= self.queue_depth_limit {
            return Err(RuntimeError::capacity(format!(
                "workflow run queue at capacity ({} pending/running)",
                self.queue_depth_limit
            )));
        }

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now_wall();
        let run = WorkflowRun {
            run_id,
            definition_name: def.name.clone(),
            trigger_payload: payload.clone(),
            state: RunState::Running,
            step_cursor: 0,
            attempt_counts: vec![0; def.steps.len()],
            vars: json!({ "trigger": payload }),
            started_at_millis: system_time_to_millis(started_at),
            ended_at_millis: None,
        };
        self.store
            .cas(&runs_ns(), &run_id.to_string(), 0, &serde_json::to_value(&run)?)
            .await?;

        self.spawn_execution(run_id);
        Ok(run_id)
    }

    fn spawn_execution(self: &Arc<Self>, run_id: Uuid) {
        let engine = self.clone();
        let cancel = CancellationToken::new();
        self.cancels.insert(run_id, cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = engine.drive(run_id, cancel).await {
                tracing::warn!(%run_id, error = %e, "workflow run ended with error");
            }
            engine.cancels.remove(&run_id);
        });
    }

    async fn load_run(&self, run_id: Uuid) -> Result<(WorkflowRun, i64)> {
        let now = self.clock.now_wall();
        let stored = self
            .store
            .get(&runs_ns(), &run_id.to_string(), now)
            .await?
            .ok_or_else(|| RuntimeError::not_found(format!("run '{run_id}' not found")))?;
        Ok((serde_json::from_value(stored.value)?, stored.version))
    }

    async fn save_run(&self, run: &WorkflowRun, expected_version: i64) -> Result<i64> {
        self.store
            .cas(&runs_ns(), &run.run_id.to_string(), expected_version, &serde_json::to_value(run)?)
            .await
    }

    /// Drives a run from its persisted `step_cursor` to completion (or to
    /// `failed`/`cancelled`). Safe to call again for a run already in
    /// `Running` state after a restart: the step at `step_cursor` is simply
    /// invoked again, since agent handlers are required to tolerate
    /// re-invocation (§6.1).
    async fn drive(self: &Arc<Self>, run_id: Uuid, cancel: CancellationToken) -> Result<()> {
        let (mut run, mut version) = self.load_run(run_id).await?;
        if run.state.is_terminal() {
            return Ok(());
        }
        let def = self.get_definition(&run.definition_name).await?;

        while run.step_cursor < def.steps.len() {
            if cancel.is_cancelled() {
                run.state = RunState::Cancelled;
                run.ended_at_millis = Some(system_time_to_millis(self.clock.now_wall()));
                self.save_run(&run, version).await?;
                return Ok(());
            }

            let i = run.step_cursor;
            let step = def.steps[i].clone();

            let condition_passes = match &step.condition {
                None => true,
                Some(src) => {
                    let expr = condition::parse(src)?;
                    condition::eval(&expr, &run.vars)
                }
            };

            if !condition_passes {
                set_step_output(&mut run.vars, i, json!({ "skipped": true }));
                run.step_cursor = i + 1;
                version = self.save_run(&run, version).await?;
                continue;
            }

            match self.execute_step(&run_id, &run, i, &step, cancel.clone()).await {
                StepOutcome::Advance(output) => {
                    set_step_output(&mut run.vars, i, output);
                    run.step_cursor = i + 1;
                    version = self.save_run(&run, version).await?;
                }
                StepOutcome::ContinueWithFailure(output) => {
                    set_step_output(&mut run.vars, i, output);
                    run.step_cursor = i + 1;
                    version = self.save_run(&run, version).await?;
                }
                StepOutcome::Fail(output) => {
                    set_step_output(&mut run.vars, i, output);
                    run.state = RunState::Failed;
                    run.ended_at_millis = Some(system_time_to_millis(self.clock.now_wall()));
                    let _ = self.save_run(&run, version).await?;
                    return Ok(());
                }
            }
        }

        run.state = RunState::Succeeded;
        run.ended_at_millis = Some(system_time_to_millis(self.clock.now_wall()));
        self.save_run(&run, version).await?;
        Ok(())
    }

    async fn execute_step(
        &self,
        run_id: &Uuid,
        run: &WorkflowRun,
        index: usize,
        step: &StepDefinition,
        cancel: CancellationToken,
    ) -> StepOutcome {
        let mut attempt = 0u32;
        loop {
            let inputs = template::expand_value(&step.inputs, &run.vars);
            let outcome = self.invoke_once(run_id, run, index, step, inputs, cancel.clone()).await;

            match outcome {
                Ok(output) => return StepOutcome::Advance(output),
                Err(e) => match &step.on_error {
                    OnError::Fail => return StepOutcome::Fail(error_output(&e)),
                    OnError::Continue => return StepOutcome::ContinueWithFailure(error_output(&e)),
                    OnError::Retry {
                        max_attempts,
                        backoff,
                        base_delay,
                    } => {
                        attempt += 1;
                        if attempt >= *max_attempts {
                            return StepOutcome::Fail(error_output(&e));
                        }
                        let delay = delay_for(*backoff, *base_delay, attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }

    async fn invoke_once(
        &self,
        run_id: &Uuid,
        run: &WorkflowRun,
        index: usize,
        step: &StepDefinition,
        inputs: Value,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let agent = self
            .agents
            .get(&step.target_agent)
            .ok_or_else(|| RuntimeError::usage(format!("workflow step targets unknown agent '{}'", step.target_agent)))?
            .clone();

        let _permit = self.step_permits.acquire().await.map_err(|_| RuntimeError::cancelled("worker pool closed"))?;

        let label = format!("workflow:{}:step:{index}", run.definition_name);
        let context = json!({ "run_id": run_id.to_string(), "step": index, "agent": step.target_agent });
        let envelope_cancel = cancel.clone();
        let action = step.action.clone();
        let run_context = run_id.to_string();
        let ctx = self.ctx.clone();

        let invocation = async move {
            let envelope = Envelope::for_step(action, inputs, run_context, envelope_cancel);
            agent.handle(envelope, &ctx).await.map(|out| out.value)
        };

        let timeout = step.timeout;
        self.health
            .track(&step.target_agent, &label, context, move || async move {
                match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, invocation)
                        .await
                        .map_err(|_| RuntimeError::timeout(format!("step {index} timed out")))?,
                    None => invocation.await,
                }
            })
            .await
    }

    pub async fn status(&self, run_id: Uuid) -> Result<WorkflowRun> {
        Ok(self.load_run(run_id).await?.0)
    }

    /// Cancels a run: signals the in-flight step's cancellation token (if
    /// the run is currently being driven by this process) and, for a run
    /// known only from the Store (e.g. after a restart with no in-memory
    /// token), transitions it directly to `cancelled`.
    pub async fn cancel(&self, run_id: Uuid) -> Result<()> {
        if let Some(token) = self.cancels.get(&run_id) {
            token.cancel();
            return Ok(());
        }
        let (mut run, version) = self.load_run(run_id).await?;
        if run.state.is_terminal() {
            return Ok(());
        }
        run.state = RunState::Cancelled;
        run.ended_at_millis = Some(system_time_to_millis(self.clock.now_wall()));
        self.save_run(&run, version).await?;
        Ok(())
    }

    pub async fn list(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>> {
        let now = self.clock.now_wall();
        let rows = self.store.scan(&runs_ns(), None, now).await?;
        let mut out = Vec::new();
        for (_, stored) in rows {
            let run: WorkflowRun = serde_json::from_value(stored.value)?;
            if let Some(name) = &filter.definition_name {
                if &run.definition_name != name {
                    continue;
                }
            }
            if let Some(state) = filter.state {
                if run.state != state {
                    continue;
                }
            }
            out.push(run);
        }
        Ok(out)
    }

    /// Re-scans runs left in `running` state (e.g. by a prior process
    /// incarnation) and resumes driving each from its persisted
    /// `step_cursor`. Called once at `Runtime::start`. The step at the
    /// cursor, if it was mid-invocation when the process died, is simply
    /// invoked again — the Agent contract requires idempotence or tolerance
    /// of re-invocation (§6.1), since the engine does not track
    /// invocation-in-progress durably.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let running = self.list(RunFilter { state: Some(RunState::Running), ..Default::default() }).await?;
        for run in &running {
            self.spawn_execution(run.run_id);
        }
        Ok(running.len())
    }
}

enum StepOutcome {
    Advance(Value),
    ContinueWithFailure(Value),
    Fail(Value),
}

fn error_output(e: &RuntimeError) -> Value {
    json!({ "ok": false, "error": { "kind": e.kind.as_str(), "message": e.message } })
}

fn set_step_output(vars: &mut Value, index: usize, output: Value) {
    let step_entry = if output.get("ok").is_some() || output.get("skipped").is_some() {
        output
    } else {
        json!({ "ok": true, "output": output })
    };
    let obj = vars.as_object_mut().expect("vars is always a JSON object");
    let steps = obj.entry("step").or_insert_with(|| Value::Array(Vec::new()));
    let arr = steps.as_array_mut().expect("vars.step is always a JSON array");
    while arr.len() <= index {
        arr.push(Value::Null);
    }
    arr[index] = step_entry;
}

/// A stable activity id for a workflow step invocation, used by callers that
/// want to correlate a health sample back to a specific (run, step) pair
/// without round-tripping through the Store.
pub fn step_activity_id(run_id: Uuid, step: usize) -> String {
    fingerprint(&[run_id.as_bytes(), &(step as u64).to_le_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, Envelope, HandlerOutput, Keyword};
    use crate::cache::NullCache;
    use crate::clock::SystemClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Agent for AlwaysFails {
        fn name(&self) -> &str {
            "flaky"
        }
        fn keywords(&self) -> &[Keyword] {
            &[]
        }
        async fn handle(&self, _envelope: Envelope, _ctx: &AgentContext) -> Result<HandlerOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::agent("always fails"))
        }
    }

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
            Ok(HandlerOutput::new(json!({ "echoed": envelope.inputs })))
        }
    }

    fn engine_with(agents: Vec<Arc<dyn Agent>>) -> (Arc<WorkflowEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(crate::store::SqliteStore::new(dir.path().join("wf.db")).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let messages = Arc::new(Messaging::new(store.clone(), clock.clone()));
        let state = Arc::new(SharedState::new(store.clone(), clock.clone()));
        let health = Arc::new(HealthMonitor::new(store.clone(), clock.clone(), messages.clone(), "system"));
        let cache: Arc<dyn Cache> = Arc::new(NullCache);
        let engine = Arc::new(WorkflowEngine::new(store, clock, health, messages, state, cache, agents, 4));
        (engine, dir)
    }

    async fn wait_terminal(engine: &WorkflowEngine, run_id: Uuid) -> WorkflowRun {
        for _ in 0..200 {
            let run = engine.status(run_id).await.unwrap();
            if run.state.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn retry_then_continue_skips_gated_step() {
        let flaky_calls = Arc::new(AtomicU32::new(0));
        let echo_calls = Arc::new(AtomicU32::new(0));
        let flaky: Arc<dyn Agent> = Arc::new(AlwaysFails { calls: flaky_calls.clone() });
        let echo: Arc<dyn Agent> = Arc::new(Echo { calls: echo_calls.clone() });
        let (engine, _dir) = engine_with(vec![flaky, echo]);

        let def = WorkflowDefinition {
            name: "retry-then-continue".into(),
            trigger_agent: "test".into(),
            trigger_event: "go".into(),
            steps: vec![
                StepDefinition {
                    target_agent: "flaky".into(),
                    action: "do_it".into(),
                    inputs: json!({}),
                    condition: None,
                    on_error: OnError::Retry {
                        max_attempts: 2,
                        backoff: Backoff::Constant,
                        base_delay: Duration::from_millis(1),
                    },
                    timeout: None,
                },
                StepDefinition {
                    target_agent: "echo".into(),
                    action: "do_it".into(),
                    inputs: json!({}),
                    condition: None,
                    on_error: OnError::Fail,
                    timeout: None,
                },
                StepDefinition {
                    target_agent: "echo".into(),
                    action: "final".into(),
                    inputs: json!({}),
                    condition: Some("vars.step.0.ok == true".into()),
                    on_error: OnError::Fail,
                    timeout: None,
                },
            ],
        };
        engine.register_definition(def).await.unwrap();

        let run_id = engine.trigger_named("retry-then-continue", json!({})).await.unwrap();
        let run = wait_terminal(&engine, run_id).await;

        assert_eq!(run.state, RunState::Succeeded);
        assert_eq!(flaky_calls.load(Ordering::SeqCst), 2);
        assert_eq!(echo_calls.load(Ordering::SeqCst), 1, "final step must have been skipped");
        assert_eq!(run.vars["step"][2], json!({ "skipped": true }));
    }

    #[tokio::test]
    async fn on_error_fail_stops_the_run() {
        let flaky: Arc<dyn Agent> = Arc::new(AlwaysFails { calls: Arc::new(AtomicU32::new(0)) });
        let (engine, _dir) = engine_with(vec![flaky]);
        let def = WorkflowDefinition {
            name: "fails-fast".into(),
            trigger_agent: "test".into(),
            trigger_event: "go".into(),
            steps: vec![StepDefinition {
                target_agent: "flaky".into(),
                action: "do_it".into(),
                inputs: json!({}),
                condition: None,
                on_error: OnError::Fail,
                timeout: None,
            }],
        };
        engine.register_definition(def).await.unwrap();
        let run_id = engine.trigger_named("fails-fast", json!({})).await.unwrap();
        let run = wait_terminal(&engine, run_id).await;
        assert_eq!(run.state, RunState::Failed);
    }

    #[tokio::test]
    async fn template_inputs_are_expanded_from_trigger_payload() {
        let echo_calls = Arc::new(AtomicU32::new(0));
        let echo: Arc<dyn Agent> = Arc::new(Echo { calls: echo_calls });
        let (engine, _dir) = engine_with(vec![echo]);
        let def = WorkflowDefinition {
            name: "greet".into(),
            trigger_agent: "test".into(),
            trigger_event: "go".into(),
            steps: vec![StepDefinition {
                target_agent: "echo".into(),
                action: "greet".into(),
                inputs: json!({ "greeting": "hi {{ vars.trigger.name }}" }),
                condition: None,
                on_error: OnError::Fail,
                timeout: None,
            }],
        };
        engine.register_definition(def).await.unwrap();
        let run_id = engine.trigger_named("greet", json!({ "name": "ada" })).await.unwrap();
        let run = wait_terminal(&engine, run_id).await;
        assert_eq!(run.state, RunState::Succeeded);
        assert_eq!(run.vars["step"][0]["output"]["echoed"]["greeting"], json!("hi ada"));
    }

    #[tokio::test]
    async fn unknown_default_value_registration_rejects_empty_steps() {
        let (engine, _dir) = engine_with(vec![]);
        let def = WorkflowDefinition {
            name: "empty".into(),
            trigger_agent: "test".into(),
            trigger_event: "go".into(),
            steps: vec![],
        };
        let err = engine.register_definition(def).await.unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::Usage);
    }

    #[tokio::test]
    async fn trigger_event_resolves_by_agent_and_event_pair() {
        let echo: Arc<dyn Agent> = Arc::new(Echo { calls: Arc::new(AtomicU32::new(0)) });
        let (engine, _dir) = engine_with(vec![echo]);
        let def = WorkflowDefinition {
            name: "bound".into(),
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
        let run_id = engine.trigger_event("cron", "tick", json!({})).await.unwrap();
        let run = wait_terminal(&engine, run_id).await;
        assert_eq!(run.definition_name, "bound");
        assert_eq!(run.state, RunState::Succeeded);
    }
}
