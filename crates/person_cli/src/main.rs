//! Server entry point.
//!
//! # Responsibility
//! - Parse configuration, start logging and open the store pool.
//! - Serve the person HTTP API until the process is interrupted.

mod config;

use clap::Parser;
use config::ServerArgs;
use log::{error, info};
use person_api::{router, AppState};
use person_core::{default_log_level, init_logging, ConnectionPool, PersonService};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    if let Err(err) = init_logging(&level, args.log_dir.as_deref()) {
        eprintln!("person_server: {err}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=server_exit module=cli status=error error={err}");
            eprintln!("person_server: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ServerArgs) -> Result<(), String> {
    let pool = ConnectionPool::open(&args.db_path, args.store_config())
        .map_err(|err| format!("failed to open store `{}`: {err}", args.db_path.display()))?;
    let state = AppState::new(PersonService::new(pool), args.api_config());

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .map_err(|err| format!("failed to bind {}: {err}", args.bind))?;
    info!(
        "event=server_start module=cli status=ok bind={} db_path={} pool_size={}",
        args.bind,
        args.db_path.display(),
        args.pool_size
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| format!("server error: {err}"))?;

    info!("event=server_stop module=cli status=ok");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed.
        error!("event=server_signal module=cli status=error error={err}");
        std::future::pending::<()>().await;
    }
}
