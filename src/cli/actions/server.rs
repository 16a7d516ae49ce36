//! Server action: the primary supervises, workers bind and serve.

use crate::api;
use crate::auth::{PgStore, SessionManager};
use crate::cli::actions::Action;
use crate::supervisor::{self, BindError, Supervisor};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{env, path::Path, process, sync::Arc, time::Duration};
use tokio::process::Command;
use tracing::{error, info};

/// Set by the primary on every worker it forks; its presence flips the
/// binary into the worker path.
pub const WORKER_ENV: &str = "LAPYX_WORKER";

/// Handle the server action
///
/// # Errors
///
/// Returns an error if the worker cannot set up its listener/pool or the
/// primary cannot fork.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        workers,
        assets,
    } = action;

    if env::var_os(WORKER_ENV).is_some() {
        run_worker(port, &dsn, &assets).await
    } else {
        run_primary(port, &dsn, workers).await
    }
}

async fn run_primary(port: u16, dsn: &str, workers: usize) -> Result<()> {
    // One-shot connectivity probe; forking never waits on the store.
    supervisor::spawn_store_probe(dsn.to_string());

    info!("Primary {} is running on port {}", process::id(), port);

    Supervisor::new(worker_command).run(workers).await
}

/// Re-exec the current binary with identical arguments; the env marker
/// makes the child take the worker path.
fn worker_command() -> Command {
    let exe = env::current_exe().unwrap_or_else(|_| "lapyx".into());
    let mut command = Command::new(exe);
    command.args(env::args_os().skip(1)).env(WORKER_ENV, "1");
    command
}

async fn run_worker(port: u16, dsn: &str, assets: &Path) -> Result<()> {
    let listener = match supervisor::bind_shared(port) {
        Ok(listener) => listener,
        Err(BindError::PermissionDenied(_)) => {
            error!("Port {port} requires elevated privileges");
            process::exit(1);
        }
        Err(BindError::AddrInUse(_)) => {
            error!("Port {port} is already in use");
            process::exit(1);
        }
        // Anything else is unhandled; the primary will fork a replacement
        // that hits the same error (known restart-loop weakness).
        Err(BindError::Other(err)) => {
            return Err(err).context("failed to bind listening socket");
        }
    };

    // Lazy pool: a store outage degrades requests instead of crash-looping
    // the worker at startup.
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect_lazy(dsn)
        .context("Invalid database connection string")?;

    let sessions = Arc::new(SessionManager::new(Arc::new(PgStore::new(pool))));

    api::serve(listener, sessions, assets).await
}
