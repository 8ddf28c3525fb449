//! One device connection: protocol selection, then the
//! read → decode → reply → emit loop.
//!
//! Everything inside a session is sequential. The reply to frame N is on the
//! wire before frame N+1 is read, and locations are queued in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::timeout;
use tokio_util::codec::{Framed, FramedParts};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gps_core::config::Config;
use gps_core::{Dispatcher, GpsError, MessageInput, Protocol, Selection, SNIFF_WINDOW};

use crate::codec::FrameCodec;
use crate::error::SessionError;
use crate::ingest::{ConnectionContext, IngestRecord, IngestSender};

/// Per-session limits, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub max_frame_errors: u32,
    pub send_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        SessionSettings {
            idle_timeout: config.listener.idle_timeout(),
            max_frame_errors: config.listener.max_frame_errors.max(1),
            send_timeout: config.ingest.send_timeout(),
        }
    }
}

/// State shared read-only by every session of one listener.
pub struct Shared {
    pub dispatcher: Dispatcher,
    pub settings: SessionSettings,
    pub ingest: IngestSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    Stopped,
    Error(SessionError),
}

impl CloseReason {
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Stopped => "stopped",
            CloseReason::Error(e) => e.kind(),
        }
    }
}

impl From<SessionError> for CloseReason {
    fn from(e: SessionError) -> Self {
        CloseReason::Error(e)
    }
}

#[derive(Debug)]
pub struct SessionSummary {
    pub id: u64,
    pub peer: SocketAddr,
    pub protocol: Option<Protocol>,
    pub frames: u64,
    pub decoded: u64,
    pub replies: u64,
    pub errors: u64,
    /// Locations that could not be queued in time.
    pub dropped: u64,
    /// Bytes discarded by framing (resync, blank records).
    pub skipped_bytes: usize,
    pub reason: CloseReason,
}

struct Session {
    id: u64,
    peer: SocketAddr,
    local_port: u16,
    state: SessionState,
    protocol: Option<Protocol>,
    frames: u64,
    decoded: u64,
    replies: u64,
    errors: u64,
    dropped: u64,
    skipped_bytes: usize,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!(conn = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn finish(mut self, reason: CloseReason) -> SessionSummary {
        self.transition(SessionState::Closing);
        let summary = SessionSummary {
            id: self.id,
            peer: self.peer,
            protocol: self.protocol,
            frames: self.frames,
            decoded: self.decoded,
            replies: self.replies,
            errors: self.errors,
            dropped: self.dropped,
            skipped_bytes: self.skipped_bytes,
            reason,
        };
        summary.log();
        summary
    }
}

impl SessionSummary {
    fn log(&self) {
        info!(
            conn = self.id,
            peer = %self.peer,
            protocol = self.protocol.map_or("-", Protocol::name),
            frames = self.frames,
            decoded = self.decoded,
            replies = self.replies,
            errors = self.errors,
            dropped = self.dropped,
            skipped_bytes = self.skipped_bytes,
            reason = self.reason.label(),
            "connection closed"
        );
    }
}

/// Run one session to completion. Never panics on peer input; every way a
/// connection can end is reported in the summary.
pub async fn run<S>(
    stream: S,
    id: u64,
    peer: SocketAddr,
    local_port: u16,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> SessionSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        id,
        peer,
        local_port,
        state: SessionState::Connecting,
        protocol: None,
        frames: 0,
        decoded: 0,
        replies: 0,
        errors: 0,
        dropped: 0,
        skipped_bytes: 0,
    };
    info!(conn = id, peer = %peer, port = local_port, "connection accepted");

    let mut stream = stream;
    let mut prefix = BytesMut::with_capacity(SNIFF_WINDOW);
    let protocol = match select_protocol(&mut stream, &mut prefix, &session, &shared, &cancel).await
    {
        Ok(protocol) => protocol,
        Err(reason) => return session.finish(reason),
    };
    session.protocol = Some(protocol);
    session.transition(SessionState::Active);
    info!(conn = id, protocol = protocol.name(), "protocol selected");

    let context = ConnectionContext {
        id,
        peer,
        local_port,
        protocol,
    };
    let mut parts = FramedParts::new::<Vec<u8>>(stream, FrameCodec::new(protocol.framing()));
    parts.read_buf = prefix;
    let mut framed = Framed::from_parts(parts);

    let reason = active_loop(&mut framed, &mut session, &context, &shared, &cancel).await;
    session.skipped_bytes = framed.codec().skipped();
    session.finish(reason)
}

/// Connecting state: pick the protocol from the port, or from the first
/// bytes on a sniff port. Bytes read here stay in `prefix` for framing.
async fn select_protocol<S>(
    stream: &mut S,
    prefix: &mut BytesMut,
    session: &Session,
    shared: &Shared,
    cancel: &CancellationToken,
) -> Result<Protocol, CloseReason>
where
    S: AsyncRead + Unpin,
{
    let settings = &shared.settings;
    loop {
        match shared.dispatcher.probe(session.local_port, prefix) {
            Ok(Selection::Selected(protocol)) => return Ok(protocol),
            Ok(Selection::NeedMore) => {}
            Err(e) => {
                warn!(conn = session.id, peer = %session.peer, error = %e, "closing connection");
                return Err(SessionError::from(e).into());
            }
        }

        let mut chunk = [0u8; SNIFF_WINDOW];
        let want = SNIFF_WINDOW - prefix.len();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CloseReason::Stopped),
            read = timeout(settings.idle_timeout, stream.read(&mut chunk[..want])) => read,
        };
        match read {
            Err(_) => return Err(SessionError::IdleTimeout(settings.idle_timeout).into()),
            Ok(Err(e)) => return Err(SessionError::Io(e).into()),
            Ok(Ok(0)) => {
                // Peer gave up before identifying itself
                let e = match shared.dispatcher.select(session.local_port, prefix) {
                    Ok(_) => return Err(CloseReason::PeerClosed),
                    Err(e) => e,
                };
                warn!(conn = session.id, peer = %session.peer, error = %e, "closing connection");
                return Err(SessionError::from(e).into());
            }
            Ok(Ok(n)) => prefix.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn active_loop<S>(
    framed: &mut Framed<S, FrameCodec>,
    session: &mut Session,
    context: &ConnectionContext,
    shared: &Shared,
    cancel: &CancellationToken,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let settings = &shared.settings;
    let protocol = context.protocol;
    let mut consecutive_errors = 0u32;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CloseReason::Stopped,
            next = timeout(settings.idle_timeout, framed.next()) => next,
        };
        let frame = match next {
            Err(_) => return SessionError::IdleTimeout(settings.idle_timeout).into(),
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                warn!(conn = session.id, error = %e, "unrecoverable framing error");
                return SessionError::from(e).into();
            }
            Ok(Some(Ok(frame))) => frame,
        };
        session.frames += 1;

        let input = MessageInput::new(frame);
        let decoded = match protocol.parse(&input) {
            Ok(decoded) => {
                consecutive_errors = 0;
                decoded
            }
            Err(e) => {
                session.errors += 1;
                consecutive_errors += 1;
                log_frame_error(session.id, protocol, &input, &e);
                if consecutive_errors >= settings.max_frame_errors {
                    warn!(
                        conn = session.id,
                        errors = consecutive_errors,
                        "repeated protocol violations"
                    );
                    return SessionError::TooManyErrors(consecutive_errors).into();
                }
                continue;
            }
        };

        if let Some(reply) = decoded.reply {
            let len = reply.len();
            match timeout(settings.idle_timeout, framed.send(reply)).await {
                Err(_) => return SessionError::IdleTimeout(settings.idle_timeout).into(),
                Ok(Err(e)) => return SessionError::from(e).into(),
                Ok(Ok(())) => {
                    session.replies += 1;
                    debug!(conn = session.id, bytes = len, "reply sent");
                }
            }
        }

        if let Some(location) = decoded.location {
            session.decoded += 1;
            debug!(
                conn = session.id,
                lat = location.latitude,
                lon = location.longitude,
                "location decoded"
            );
            let record = IngestRecord {
                connection: context.clone(),
                location,
                received_at: Utc::now(),
            };
            match shared.ingest.send_timeout(record, settings.send_timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    session.dropped += 1;
                    warn!(conn = session.id, "ingest queue full, location dropped");
                }
                Err(SendTimeoutError::Closed(_)) => {
                    session.dropped += 1;
                    warn!(conn = session.id, "ingest queue closed, location dropped");
                }
            }
        }
    }
}

fn log_frame_error(conn: u64, protocol: Protocol, input: &MessageInput, error: &GpsError) {
    let preview = if protocol.is_text() {
        input.text().chars().take(80).collect::<String>()
    } else {
        input.hex().iter().take(32).map(String::as_str).collect()
    };
    match error {
        GpsError::ChecksumMismatch { .. } => {
            warn!(conn, kind = error.kind(), error = %error, frame = %preview, "frame dropped")
        }
        _ => debug!(conn, kind = error.kind(), error = %error, frame = %preview, "frame dropped"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
