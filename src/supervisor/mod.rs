//! Primary/worker process supervision.
//!
//! One primary forks `N` workers that all bind the same port through
//! `SO_REUSEPORT`; the kernel spreads incoming connections across them. Any
//! worker exit, whatever the code or signal, is answered with exactly one
//! replacement fork. There is no backoff and no restart ceiling, so a worker
//! that dies on arrival is re-forked just as fast. Known operational risk,
//! kept to match the observed behavior; the policy lives behind
//! [`Supervisor`] so backoff can be added without touching worker logic.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::net::{Ipv6Addr, SocketAddr, TcpListener};
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Listening-socket failures that are fatal to a worker.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("permission denied binding port: {0}")]
    PermissionDenied(#[source] io::Error),
    #[error("address already in use: {0}")]
    AddrInUse(#[source] io::Error),
    #[error(transparent)]
    Other(io::Error),
}

/// Bind the shared listening port for this worker.
///
/// Every worker binds the same port with `SO_REUSEPORT` set; the first
/// worker whose bind fails for a reason other than sharing reports it via
/// the classified error.
///
/// # Errors
///
/// `PermissionDenied` and `AddrInUse` for the two expected failure causes,
/// `Other` for anything else.
pub fn bind_shared(port: u16) -> Result<TcpListener, BindError> {
    let address = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match bind_reuse_port(&address) {
        Ok(listener) => Ok(listener),
        Err(err) => match err.kind() {
            io::ErrorKind::PermissionDenied => Err(BindError::PermissionDenied(err)),
            io::ErrorKind::AddrInUse => Err(BindError::AddrInUse(err)),
            _ => Err(BindError::Other(err)),
        },
    }
}

fn bind_reuse_port(address: &SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    // axum drives the listener through the runtime; it must not block.
    socket.set_nonblocking(true)?;
    socket.bind(&(*address).into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

/// Fire-and-forget connectivity probe run by the primary at startup.
///
/// Logs success or failure and nothing more; forking never waits on the
/// store.
pub fn spawn_store_probe(dsn: String) {
    tokio::spawn(async move {
        match probe_store(&dsn).await {
            Ok(()) => info!("Database connection successful"),
            Err(err) => error!("Database connection failed: {err:#}"),
        }
    });
}

async fn probe_store(dsn: &str) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(dsn)
        .await
        .context("failed to connect to database")?;
    sqlx::query("SELECT 1 + 1 AS solution")
        .fetch_one(&pool)
        .await
        .context("probe query failed")?;
    Ok(())
}

/// Worker lifecycle notifications, for operational logging and tests.
#[derive(Debug)]
pub enum WorkerEvent {
    Started {
        pid: Option<u32>,
    },
    Exited {
        pid: Option<u32>,
        status: io::Result<ExitStatus>,
    },
}

/// Forks worker processes and restarts each one as it exits.
pub struct Supervisor {
    factory: Box<dyn Fn() -> Command + Send + Sync>,
    events: Option<UnboundedSender<WorkerEvent>>,
}

impl Supervisor {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Command + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            events: None,
        }
    }

    /// Subscribe to worker lifecycle events.
    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Fork `workers` processes, then replace each one as it exits, forever.
    ///
    /// # Errors
    ///
    /// Returns an error only when a fork itself fails; worker exits of any
    /// kind are absorbed by the restart policy.
    pub async fn run(self, workers: usize) -> Result<()> {
        let mut children = JoinSet::new();
        for _ in 0..workers {
            self.spawn_worker(&mut children)?;
        }

        while let Some(joined) = children.join_next().await {
            let (pid, status) = joined.context("worker wait task panicked")?;
            let pid_label = pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
            match &status {
                Ok(status) => error!("worker {pid_label} died ({status})"),
                Err(err) => error!("worker {pid_label} died (wait failed: {err})"),
            }
            self.emit(WorkerEvent::Exited { pid, status });

            // Unconditional one-for-one replacement.
            self.spawn_worker(&mut children)?;
        }

        Ok(())
    }

    fn spawn_worker(
        &self,
        children: &mut JoinSet<(Option<u32>, io::Result<ExitStatus>)>,
    ) -> Result<()> {
        let mut child = (self.factory)().spawn().context("failed to fork worker")?;
        let pid = child.id();
        let pid_label = pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
        info!("Forked worker {pid_label}");
        self.emit(WorkerEvent::Started { pid });
        children.spawn(async move { (pid, child.wait().await) });
        Ok(())
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const EVENT_WINDOW: Duration = Duration::from_secs(5);

    #[test]
    fn bind_shared_reports_port_in_use() {
        // A plain listener without SO_REUSEPORT blocks shared binds.
        let plain = TcpListener::bind((Ipv6Addr::UNSPECIFIED, 0)).expect("bind plain listener");
        let port = plain.local_addr().expect("local addr").port();

        match bind_shared(port) {
            Err(BindError::AddrInUse(_)) => {}
            other => panic!("expected AddrInUse, got {other:?}"),
        }
    }

    #[test]
    fn bind_shared_allows_sharing_between_workers() {
        let first = bind_shared(0).expect("first bind");
        let port = first.local_addr().expect("local addr").port();
        let second = bind_shared(port).expect("second bind shares the port");
        assert_eq!(second.local_addr().expect("local addr").port(), port);
    }

    fn sleeping_worker() -> Command {
        let mut command = Command::new("sleep");
        command.arg("30").kill_on_drop(true);
        command
    }

    async fn next_started(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> u32 {
        loop {
            let event = timeout(EVENT_WINDOW, rx.recv())
                .await
                .expect("event within window")
                .expect("supervisor alive");
            if let WorkerEvent::Started { pid } = event {
                return pid.expect("child pid");
            }
        }
    }

    #[tokio::test]
    async fn sigkilled_worker_is_replaced_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(sleeping_worker).with_events(tx);
        let running = tokio::spawn(supervisor.run(1));

        let first_pid = next_started(&mut rx).await;

        let killed = std::process::Command::new("kill")
            .args(["-9", &first_pid.to_string()])
            .status()
            .expect("send SIGKILL");
        assert!(killed.success());

        // The exit is observed, then exactly one replacement starts.
        let exited = timeout(EVENT_WINDOW, rx.recv())
            .await
            .expect("exit within window")
            .expect("supervisor alive");
        match exited {
            WorkerEvent::Exited { pid, .. } => assert_eq!(pid, Some(first_pid)),
            other => panic!("expected exit event, got {other:?}"),
        }

        let second_pid = next_started(&mut rx).await;
        assert_ne!(second_pid, first_pid);

        // No further events while the replacement keeps running.
        assert!(
            timeout(Duration::from_millis(500), rx.recv()).await.is_err(),
            "supervisor restarted more than once"
        );

        running.abort();
    }

    #[tokio::test]
    async fn crashing_worker_is_restarted_without_backoff() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(|| {
            let mut command = Command::new("false");
            command.kill_on_drop(true);
            command
        })
        .with_events(tx);
        let running = tokio::spawn(supervisor.run(1));

        // The worker exits nonzero immediately and keeps being replaced.
        let mut starts = 0;
        while starts < 3 {
            let event = timeout(EVENT_WINDOW, rx.recv())
                .await
                .expect("event within window")
                .expect("supervisor alive");
            if matches!(event, WorkerEvent::Started { .. }) {
                starts += 1;
            }
        }

        running.abort();
    }
}
