//! Subcommand definitions and dispatch. One enum variant per subsystem,
//! each carrying a `clap::Subcommand` of its own `list | get | set | remove
//! | inspect` actions, in a nested-subcommand shape.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use conductor_core::error::{Result, RuntimeError};
use conductor_core::messaging::Priority;
use conductor_core::runtime::Runtime;
use conductor_core::scheduler::webhook::WebhookBinding;
use conductor_core::workflow::{RunFilter, RunState, WorkflowDefinition};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Administrative CLI for the conductor runtime")]
pub struct Args {
    /// Path to the Store's SQLite file (overrides config/env resolution).
    #[arg(long, global = true, value_name = "PATH")]
    pub store_path: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Registered agents (router table).
    Agents(AgentsArgs),
    /// The messaging bus: send, receive, acknowledge, clear.
    Messages(MessagesArgs),
    /// Shared key/value state and locks.
    State(StateArgs),
    /// Per-agent health roll-ups.
    Health(HealthArgs),
    /// Function-result cache.
    Cache(CacheArgs),
    /// Workflow definitions and runs.
    Workflows(WorkflowsArgs),
    /// Scheduled (cron) jobs.
    Cron(CronArgs),
    /// Webhook bindings.
    Webhooks(WebhooksArgs),
    /// Run the HTTP webhook surface (delegates to conductor-serve).
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct AgentsArgs {
    #[command(subcommand)]
    pub action: AgentsAction,
}

#[derive(Subcommand, Debug)]
pub enum AgentsAction {
    /// List every registered agent, its keywords, and whether it is enabled.
    List,
    /// Show one agent's routing entry and a dry-run score for a sample task.
    Inspect {
        name: String,
        /// Task text to score against this agent's keywords (optional).
        #[arg(long)]
        against: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct MessagesArgs {
    #[command(subcommand)]
    pub action: MessagesAction,
}

#[derive(Subcommand, Debug)]
pub enum MessagesAction {
    /// Send a message.
    Send {
        from: String,
        to: String,
        body: String,
        #[arg(long, default_value = "text/plain")]
        content_type: String,
        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,
    },
    /// List a recipient's inbox (highest priority first, FIFO within a priority).
    List {
        recipient: String,
        #[arg(long, default_value_t = 100)]
        max: usize,
        /// Do not mark returned messages as delivered.
        #[arg(long)]
        peek: bool,
    },
    /// Acknowledge (remove) a delivered message.
    Ack { recipient: String, message_id: String },
    /// Inbox counts by priority.
    Counts { recipient: String },
    /// Delete acknowledged messages older than the given age.
    Clear {
        recipient: String,
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum PriorityArg {
    Urgent,
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Urgent => Priority::Urgent,
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub action: StateAction,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    Get { key: String },
    /// `value` must be a JSON literal, e.g. `'"a string"'` or `'{"a":1}'`.
    Set {
        key: String,
        value: String,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    Remove { key: String },
}

#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    #[command(subcommand)]
    pub action: HealthAction,
}

#[derive(Subcommand, Debug)]
pub enum HealthAction {
    /// Roll-up for one agent over a trailing window (default 5 minutes).
    Status {
        agent: String,
        #[arg(long, default_value_t = 300)]
        window_secs: u64,
    },
    /// Roll-ups for every agent with at least one recorded sample.
    Dashboard,
    RecentErrors {
        agent: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(clap::Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Entry count, hit/miss counters, and approximate size in bytes.
    Stats,
    /// Remove every entry whose tags match a glob (e.g. `user:*`).
    Invalidate { tag_pattern: String },
}

#[derive(clap::Args, Debug)]
pub struct WorkflowsArgs {
    #[command(subcommand)]
    pub action: WorkflowsAction,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowsAction {
    /// Register (or overwrite) a definition from a JSON file.
    Register { file: std::path::PathBuf },
    Get { name: String },
    /// Trigger the definition bound to `agent`/`event`.
    Trigger {
        agent: String,
        event: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Trigger a definition by its own name, bypassing trigger_agent/event matching.
    TriggerNamed {
        name: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    Status { run_id: Uuid },
    Cancel { run_id: Uuid },
    List {
        #[arg(long)]
        definition_name: Option<String>,
        #[arg(long)]
        state: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct CronArgs {
    #[command(subcommand)]
    pub action: CronAction,
}

#[derive(Subcommand, Debug)]
pub enum CronAction {
    Add {
        expression: String,
        target_agent: String,
        target_event: String,
        #[arg(long, default_value = "{}")]
        payload_template: String,
    },
    Remove { job_id: Uuid },
    Enable { job_id: Uuid },
    Disable { job_id: Uuid },
    List,
}

#[derive(clap::Args, Debug)]
pub struct WebhooksArgs {
    #[command(subcommand)]
    pub action: WebhooksAction,
}

#[derive(Subcommand, Debug)]
pub enum WebhooksAction {
    Add {
        name: String,
        path: String,
        secret: String,
        target_workflow: String,
        #[arg(long)]
        max_body_bytes: Option<usize>,
    },
    Remove { name: String },
    Get { name: String },
    List,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    #[arg(long, value_name = "ADDR")]
    pub addr: Option<String>,
    /// Keep serving after the first connection (default: used by tests/CI to exit after one).
    #[arg(long)]
    pub keep_alive: bool,
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| RuntimeError::usage(format!("invalid JSON: {e}")))
}

fn parse_run_state(raw: &str) -> Result<RunState> {
    match raw {
        "pending" => Ok(RunState::Pending),
        "running" => Ok(RunState::Running),
        "paused" => Ok(RunState::Paused),
        "succeeded" => Ok(RunState::Succeeded),
        "failed" => Ok(RunState::Failed),
        "cancelled" => Ok(RunState::Cancelled),
        other => Err(RuntimeError::usage(format!("unknown run state '{other}'"))),
    }
}

/// Runs one subcommand against `runtime` and returns a JSON value to print.
/// `Serve` is handled separately by `main` (it does not return; it blocks).
pub async fn dispatch(runtime: &Arc<Runtime>, cmd: Command) -> Result<Value> {
    match cmd {
        Command::Agents(a) => match a.action {
            AgentsAction::List => {
                let agents = runtime.router().list_agents();
                Ok(json!(agents
                    .into_iter()
                    .map(|a| json!({ "name": a.name, "keywords": a.keywords, "enabled": a.enabled }))
                    .collect::<Vec<_>>()))
            }
            AgentsAction::Inspect { name, against } => {
                let agents = runtime.router().list_agents();
                let found = agents
                    .into_iter()
                    .find(|a| a.name == name)
                    .ok_or_else(|| RuntimeError::not_found(format!("agent '{name}' is not registered")))?;
                let mut out = json!({ "name": found.name, "keywords": found.keywords, "enabled": found.enabled });
                if let Some(task) = against {
                    let dry = runtime.router().dry_run(&task);
                    out["dry_run"] = json!({ "agent": dry.agent, "score": dry.score, "tokens": dry.tokens });
                }
                Ok(out)
            }
        },
        Command::Messages(a) => match a.action {
            MessagesAction::Send {
                from,
                to,
                body,
                content_type,
                priority,
            } => {
                let id = runtime
                    .messages()
                    .send(&from, &to, body.as_bytes(), &content_type, priority.into())
                    .await?;
                Ok(json!({ "message_id": id }))
            }
            MessagesAction::List { recipient, max, peek } => {
                let messages = runtime.messages().receive(&recipient, max, !peek).await?;
                Ok(json!(messages))
            }
            MessagesAction::Ack { recipient, message_id } => {
                runtime.messages().acknowledge(&recipient, &message_id).await?;
                Ok(json!({ "acknowledged": message_id }))
            }
            MessagesAction::Counts { recipient } => {
                let counts = runtime.messages().counts(&recipient).await?;
                Ok(json!({
                    "queued": counts.queued,
                    "delivered": counts.delivered,
                    "acknowledged": counts.acknowledged,
                }))
            }
            MessagesAction::Clear { recipient, older_than_secs } => {
                let removed = runtime
                    .messages()
                    .clear(&recipient, older_than_secs.map(Duration::from_secs))
                    .await?;
                Ok(json!({ "removed": removed }))
            }
        },
        Command::State(a) => match a.action {
            StateAction::Get { key } => {
                let value = runtime.state().get(&key).await?;
                Ok(json!({ "key": key, "value": value }))
            }
            StateAction::Set { key, value, ttl_secs } => {
                let parsed = parse_json(&value)?;
                runtime.state().set(&key, parsed, ttl_secs.map(Duration::from_secs)).await?;
                Ok(json!({ "key": key, "set": true }))
            }
            StateAction::Remove { key } => {
                let removed = runtime.state().delete(&key).await?;
                Ok(json!({ "key": key, "removed": removed }))
            }
        },
        Command::Health(a) => match a.action {
            HealthAction::Status { agent, window_secs } => {
                let rollup = runtime.health().status(&agent, Duration::from_secs(window_secs)).await?;
                Ok(json!(rollup))
            }
            HealthAction::Dashboard => {
                let rows = runtime.health().dashboard().await?;
                Ok(json!(rows
                    .into_iter()
                    .map(|(agent, rollup)| json!({ "agent": agent, "rollup": rollup }))
                    .collect::<Vec<_>>()))
            }
            HealthAction::RecentErrors { agent, limit } => {
                let errors = runtime.health().recent_errors(&agent, limit).await?;
                let millis: Vec<i64> = errors
                    .into_iter()
                    .map(|t| {
                        t.duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.as_millis() as i64)
                            .unwrap_or_default()
                    })
                    .collect();
                Ok(json!(millis))
            }
        },
        Command::Cache(a) => match a.action {
            CacheAction::Stats => {
                let stats = runtime.cache().stats().await;
                Ok(json!(stats))
            }
            CacheAction::Invalidate { tag_pattern } => {
                let removed = runtime.cache().invalidate(&tag_pattern).await?;
                Ok(json!({ "removed": removed }))
            }
        },
        Command::Workflows(a) => match a.action {
            WorkflowsAction::Register { file } => {
                let content = std::fs::read_to_string(&file)
                    .map_err(|e| RuntimeError::usage(format!("cannot read {}: {e}", file.display())))?;
                let def: WorkflowDefinition = serde_json::from_str(&content)
                    .map_err(|e| RuntimeError::usage(format!("invalid workflow definition: {e}")))?;
                let name = def.name.clone();
                runtime.workflows().register_definition(def).await?;
                Ok(json!({ "registered": name }))
            }
            WorkflowsAction::Get { name } => {
                let def = runtime.workflows().get_definition(&name).await?;
                Ok(json!(def))
            }
            WorkflowsAction::Trigger { agent, event, payload } => {
                let payload = parse_json(&payload)?;
                let run_id = runtime.workflows().trigger_event(&agent, &event, payload).await?;
                Ok(json!({ "run_id": run_id }))
            }
            WorkflowsAction::TriggerNamed { name, payload } => {
                let payload = parse_json(&payload)?;
                let run_id = runtime.workflows().trigger_named(&name, payload).await?;
                Ok(json!({ "run_id": run_id }))
            }
            WorkflowsAction::Status { run_id } => {
                let run = runtime.workflows().status(run_id).await?;
                Ok(json!(run))
            }
            WorkflowsAction::Cancel { run_id } => {
                runtime.workflows().cancel(run_id).await?;
                Ok(json!({ "cancelled": run_id }))
            }
            WorkflowsAction::List { definition_name, state } => {
                let state = state.map(|s| parse_run_state(&s)).transpose()?;
                let filter = RunFilter { definition_name, state };
                let runs = runtime.workflows().list(filter).await?;
                Ok(json!(runs))
            }
        },
        Command::Cron(a) => match a.action {
            CronAction::Add {
                expression,
                target_agent,
                target_event,
                payload_template,
            } => {
                let payload_template = parse_json(&payload_template)?;
                let job_id = runtime
                    .cron()
                    .add_job(&expression, &target_agent, &target_event, payload_template)
                    .await?;
                Ok(json!({ "job_id": job_id }))
            }
            CronAction::Remove { job_id } => {
                runtime.cron().remove_job(job_id).await?;
                Ok(json!({ "removed": job_id }))
            }
            CronAction::Enable { job_id } => {
                runtime.cron().enable(job_id).await?;
                Ok(json!({ "enabled": job_id }))
            }
            CronAction::Disable { job_id } => {
                runtime.cron().disable(job_id).await?;
                Ok(json!({ "disabled": job_id }))
            }
            CronAction::List => {
                let jobs = runtime.cron().list_jobs().await?;
                Ok(json!(jobs
                    .into_iter()
                    .map(|j| json!({
                        "id": j.id,
                        "expression": j.expression,
                        "target_agent": j.target_agent,
                        "target_event": j.target_event,
                        "enabled": j.enabled,
                        "last_run_millis": j.last_run_millis,
                        "next_run_millis": j.next_run_millis,
                    }))
                    .collect::<Vec<_>>()))
            }
        },
        Command::Webhooks(a) => match a.action {
            WebhooksAction::Add {
                name,
                path,
                secret,
                target_workflow,
                max_body_bytes,
            } => {
                let mut binding = WebhookBinding::new(path, secret, target_workflow);
                if let Some(max) = max_body_bytes {
                    binding = binding.with_max_body_bytes(max);
                }
                runtime.webhooks().add_binding(&name, binding).await?;
                Ok(json!({ "added": name }))
            }
            WebhooksAction::Remove { name } => {
                runtime.webhooks().remove_binding(&name).await?;
                Ok(json!({ "removed": name }))
            }
            WebhooksAction::Get { name } => {
                let binding = runtime.webhooks().get_binding(&name).await?;
                Ok(json!({ "name": name, "path": binding.path, "target_workflow": binding.target_workflow }))
            }
            WebhooksAction::List => {
                let bindings = runtime.webhooks().list_bindings().await?;
                Ok(json!(bindings
                    .into_iter()
                    .map(|(name, binding)| json!({
                        "name": name,
                        "path": binding.path,
                        "target_workflow": binding.target_workflow,
                    }))
                    .collect::<Vec<_>>()))
            }
        },
        Command::Serve(_) => unreachable!("Serve is handled by main before dispatch"),
    }
}
