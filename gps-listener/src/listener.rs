//! TCP accept loops, one per configured port.
//!
//! Each loop owns the sessions it spawned. On stop the loops quit accepting,
//! give their sessions the grace period to finish, then abort whatever is
//! left.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gps_core::config::Config;
use gps_core::{Dispatcher, PortRole};

use crate::error::ListenerError;
use crate::ingest::IngestSender;
use crate::session::{self, SessionSettings, SessionSummary, Shared};

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listener;

impl Listener {
    /// Bind every port in `dispatcher` on `config.listener.host` and start
    /// accepting. Port 0 binds an ephemeral port; see
    /// [`ListenerHandle::local_addrs`].
    pub async fn start(
        config: &Config,
        dispatcher: Dispatcher,
        ingest: IngestSender,
    ) -> Result<ListenerHandle, ListenerError> {
        if dispatcher.is_empty() {
            return Err(ListenerError::NoPorts);
        }

        let host = config.listener.host.as_str();
        let mut bound = Dispatcher::new();
        let mut sockets = Vec::new();
        for (port, role) in dispatcher.ports() {
            let socket = TcpListener::bind((host, port))
                .await
                .map_err(|source| ListenerError::Bind {
                    addr: format!("{host}:{port}"),
                    source,
                })?;
            let addr = socket.local_addr()?;
            // Key the table by the port actually bound
            match role {
                PortRole::Fixed(protocol) => bound.register(addr.port(), protocol),
                PortRole::Sniff => bound.register_sniff(addr.port()),
            };
            info!(%addr, role = %role_label(role), "listening");
            sockets.push((socket, addr));
        }

        let shared = Arc::new(Shared {
            dispatcher: bound,
            settings: SessionSettings::from_config(config),
            ingest,
        });
        let cancel = CancellationToken::new();
        let next_id = Arc::new(AtomicU64::new(1));
        let grace = config.listener.grace_period();

        let mut local_addrs = Vec::with_capacity(sockets.len());
        let mut tasks = Vec::with_capacity(sockets.len());
        for (socket, addr) in sockets {
            local_addrs.push(addr);
            tasks.push(tokio::spawn(accept_loop(
                socket,
                shared.clone(),
                cancel.clone(),
                next_id.clone(),
                grace,
            )));
        }

        Ok(ListenerHandle {
            cancel,
            tasks,
            local_addrs,
        })
    }
}

fn role_label(role: PortRole) -> String {
    match role {
        PortRole::Fixed(protocol) => protocol.to_string(),
        PortRole::Sniff => "sniff".into(),
    }
}

/// Totals reported by [`ListenerHandle::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Sessions that finished on their own within the grace period.
    pub drained: usize,
    /// Sessions still running at the deadline.
    pub aborted: usize,
}

pub struct ListenerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<StopReport>>,
    local_addrs: Vec<SocketAddr>,
}

impl ListenerHandle {
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Stop accepting, wait out the grace period, abort the rest.
    pub async fn stop(self) -> StopReport {
        info!("listener stopping");
        self.cancel.cancel();
        let mut report = StopReport::default();
        for task in self.tasks {
            match task.await {
                Ok(r) => {
                    report.drained += r.drained;
                    report.aborted += r.aborted;
                }
                Err(e) => error!(error = %e, "accept loop failed"),
            }
        }
        info!(
            drained = report.drained,
            aborted = report.aborted,
            "listener stopped"
        );
        report
    }
}

async fn accept_loop(
    socket: TcpListener,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    next_id: Arc<AtomicU64>,
    grace: Duration,
) -> StopReport {
    let mut sessions: JoinSet<SessionSummary> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => reap(joined),
            accepted = socket.accept() => match accepted {
                Ok((stream, peer)) => {
                    let local_port = match stream.local_addr() {
                        Ok(addr) => addr.port(),
                        Err(e) => {
                            warn!(%peer, error = %e, "dropping connection without local address");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "cannot disable Nagle");
                    }
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    sessions.spawn(session::run(
                        stream,
                        id,
                        peer,
                        local_port,
                        shared.clone(),
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    drop(socket);

    let mut report = StopReport::default();
    let drain = async {
        while let Some(joined) = sessions.join_next().await {
            reap(joined);
            report.drained += 1;
        }
    };
    if timeout(grace, drain).await.is_err() {
        report.aborted = sessions.len();
        warn!(
            sessions = report.aborted,
            "grace period elapsed, aborting sessions"
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
    report
}

fn reap(joined: Result<SessionSummary, JoinError>) {
    match joined {
        Ok(summary) => debug!(conn = summary.id, reason = summary.reason.label(), "session reaped"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "session task panicked"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
