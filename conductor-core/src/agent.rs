//! The contract external collaborators implement to plug into the runtime.
//!
//! An [`Agent`] is the only sanctioned side-effect channel the core knows
//! about: domain logic (a print-queue watcher, a chat bot, a sync job) lives
//! entirely behind this trait, the same way a `Tool` trait keeps
//! LLM-facing side effects behind a single `call` entry point.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;
use crate::messaging::Messaging;
use crate::state::SharedState;

/// A keyword and its weight, contributed to an agent's score during routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub token: String,
    pub weight: u32,
}

impl Keyword {
    pub fn new(token: impl Into<String>, weight: u32) -> Self {
        Self {
            token: token.into(),
            weight,
        }
    }
}

/// What the Router or Workflow Engine hands an agent's handler for one
/// invocation.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The raw task description (Router dispatch) or the step's `action`
    /// name (Workflow Engine step execution).
    pub task_or_action: String,
    /// Expanded step inputs, or an empty object for a bare Router dispatch.
    pub inputs: Value,
    /// A free-form id correlating this invocation to a dispatch or workflow
    /// run, for agents that want to log it.
    pub run_context: Option<String>,
    /// Signalled when the caller's timeout elapses or the run is cancelled.
    pub cancel: CancellationToken,
}

impl Envelope {
    pub fn for_dispatch(task: impl Into<String>, dispatch_id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            task_or_action: task.into(),
            inputs: Value::Object(Default::default()),
            run_context: Some(dispatch_id.to_string()),
            cancel,
        }
    }

    pub fn for_step(action: impl Into<String>, inputs: Value, run_context: String, cancel: CancellationToken) -> Self {
        Self {
            task_or_action: action.into(),
            inputs,
            run_context: Some(run_context),
            cancel,
        }
    }
}

/// The result an agent's handler returns, carried back through the Router
/// (as the dispatch result) or the Workflow Engine (as a step output, stored
/// into the run's variable scope).
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub value: Value,
}

impl HandlerOutput {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

/// Runtime services injected into every agent: messaging, shared state plus
/// locks, and the function-result cache. These are the only sanctioned
/// side-effect channels the core knows about.
#[derive(Clone)]
pub struct AgentContext {
    pub messages: Arc<Messaging>,
    pub state: Arc<SharedState>,
    pub cache: Arc<dyn Cache>,
}

/// An external collaborator. The handler MUST be idempotent with respect to
/// its inputs, or tolerate re-invocation after crashes: the Router and
/// Workflow Engine may both invoke it more than once for the same logical
/// task (dispatch retried by a caller, or a workflow step replayed after a
/// process restart finds no durable record of its completion).
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique, stable name. Never changes while registered.
    fn name(&self) -> &str;

    /// Keywords (and weights) the Router scores task descriptions against.
    /// Fixed for the agent's registered lifetime: an agent must not mutate
    /// its keyword set while running.
    fn keywords(&self) -> &[Keyword];

    /// Whether this agent currently accepts dispatch. A disabled agent is
    /// excluded from routing (as if its score were always zero) but remains
    /// registered and listed.
    fn enabled(&self) -> bool {
        true
    }

    /// Handles one task dispatch or workflow step invocation.
    async fn handle(&self, envelope: Envelope, ctx: &AgentContext) -> Result<HandlerOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn keywords(&self) -> &[Keyword] {
            &[]
        }

        async fn handle(&self, envelope: Envelope, _ctx: &AgentContext) -> Result<HandlerOutput> {
            Ok(HandlerOutput::new(serde_json::json!({
                "echo": envelope.task_or_action
            })))
        }
    }

    #[tokio::test]
    async fn agent_trait_is_object_safe_and_dispatchable() {
        let agents: Vec<Box<dyn Agent>> = vec![Box::new(Echo)];
        let cancel = CancellationToken::new();
        let envelope = Envelope::for_dispatch("hello", Uuid::new_v4(), cancel);
        let name = agents[0].name().to_string();
        assert_eq!(name, "echo");
        assert!(agents[0].enabled());
        let _ = envelope;
    }
}
