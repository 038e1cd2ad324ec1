//! Administrative surface for the conductor runtime.
//!
//! Thin shells over [`conductor_core::runtime::Runtime`]: every subcommand
//! opens the same durable Store the running agents use and calls straight
//! through to the core API, never duplicating runtime logic in the binary.

pub mod commands;
pub mod exit;
pub mod noop_agent;
