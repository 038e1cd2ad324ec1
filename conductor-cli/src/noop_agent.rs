//! Placeholder agent the CLI registers as the runtime's `default_agent` so
//! `Router::new`'s "default agent must be registered" invariant holds for a
//! process that hosts no real business agents of its own. Administrative
//! subcommands (messages, state, health, cache, cron, webhooks, workflow
//! register/status/list/cancel) never dispatch through it; only `workflows
//! trigger`/`trigger-named` would reach a step agent, and only if that
//! step's `target_agent` happens to be registered in this process.

use async_trait::async_trait;
use conductor_core::agent::{Agent, AgentContext, Envelope, HandlerOutput, Keyword};
use conductor_core::error::Result;

pub struct NoopAgent {
    name: String,
}

impl NoopAgent {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for NoopAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> &[Keyword] {
        &[]
    }

    async fn handle(&self, envelope: Envelope, _ctx: &AgentContext) -> Result<HandlerOutput> {
        Ok(HandlerOutput::new(envelope.inputs))
    }
}
