//! `conductor`: administrative CLI binary.
//!
//! One subcommand per subsystem, each a thin shell over
//! `conductor_core::runtime::Runtime` — commands never touch the Store
//! directly, matching `cli`'s own relationship to `loom`.

use std::sync::Arc;

use clap::Parser;
use conductor_cli::commands::{self, Args, Command};
use conductor_cli::exit;
use conductor_cli::noop_agent::NoopAgent;
use conductor_core::runtime::Runtime;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match conductor_config::load_runtime_config(None) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("conductor: failed to load configuration: {e}");
            std::process::exit(exit::RUNTIME_ERROR);
        }
    };
    if let Some(path) = args.store_path {
        config.store_path = path;
    }

    let default_agent: Arc<dyn conductor_core::agent::Agent> =
        Arc::new(NoopAgent::named(config.default_agent.clone()));

    match args.cmd {
        Command::Serve(serve_args) => {
            let runtime = match Runtime::start(config, vec![default_agent]).await {
                Ok(rt) => rt,
                Err(e) => exit::fail(e),
            };
            let once = !serve_args.keep_alive;
            let result = conductor_serve::run_serve(serve_args.addr.as_deref(), runtime.clone(), once).await;
            runtime.shutdown().await;
            if let Err(e) = result {
                eprintln!("conductor: serve error: {e}");
                std::process::exit(exit::RUNTIME_ERROR);
            }
        }
        other => {
            let runtime: Arc<Runtime> = match Runtime::start(config, vec![default_agent]).await {
                Ok(rt) => rt,
                Err(e) => exit::fail(e),
            };

            let result = commands::dispatch(&runtime, other).await;
            runtime.shutdown().await;

            match result {
                Ok(value) => {
                    println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
                }
                Err(e) => exit::fail(e),
            }
        }
    }
}
