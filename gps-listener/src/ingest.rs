//! Hand-off of decoded locations to downstream collaborators.
//!
//! Sessions push [`IngestRecord`]s into a bounded channel; a single
//! forwarder task drains it into one or more [`LocationSink`]s. Persistence
//! and identity resolution live behind those sinks, outside this crate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use gps_core::{Location, Protocol};

use crate::error::IngestError;

/// Which connection a location arrived on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionContext {
    pub id: u64,
    pub peer: SocketAddr,
    pub local_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestRecord {
    pub connection: ConnectionContext,
    pub location: Location,
    pub received_at: DateTime<Utc>,
}

pub type IngestSender = mpsc::Sender<IngestRecord>;
pub type IngestReceiver = mpsc::Receiver<IngestRecord>;

pub fn channel(capacity: usize) -> (IngestSender, IngestReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Downstream consumer of decoded locations.
#[async_trait]
pub trait LocationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn ingest(&self, record: &IngestRecord) -> Result<(), IngestError>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes each record as one JSON line through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl LocationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn ingest(&self, record: &IngestRecord) -> Result<(), IngestError> {
        let json = serde_json::to_string(record)?;
        info!(target: "gps_listener::location", conn = record.connection.id, "{json}");
        Ok(())
    }
}

/// POSTs each record as JSON to a webhook URL.
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Every request, connect included, is bounded by `request_timeout`.
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(WebhookSink::with_client(url, client))
    }

    pub fn with_client(url: &str, client: reqwest::Client) -> Self {
        WebhookSink {
            url: url.to_string(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LocationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn ingest(&self, record: &IngestRecord) -> Result<(), IngestError> {
        let response = self.client.post(&self.url).json(record).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Rejected(format!(
                "{} answered {status}",
                self.url
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub records: u64,
    pub failures: u64,
}

/// Drain `rx` into every sink until all senders are dropped.
///
/// A sink that fails, or does not finish within `sink_timeout`, is logged and
/// skipped for that record; records are never retried.
pub fn spawn_forwarder(
    mut rx: IngestReceiver,
    sinks: Vec<Arc<dyn LocationSink>>,
    sink_timeout: Duration,
) -> JoinHandle<ForwardStats> {
    tokio::spawn(async move {
        let mut stats = ForwardStats::default();
        while let Some(record) = rx.recv().await {
            stats.records += 1;
            for sink in &sinks {
                let delivered = timeout(sink_timeout, sink.ingest(&record))
                    .await
                    .unwrap_or(Err(IngestError::Timeout(sink_timeout)));
                if let Err(e) = delivered {
                    stats.failures += 1;
                    warn!(
                        sink = sink.name(),
                        conn = record.connection.id,
                        error = %e,
                        "location not delivered"
                    );
                }
            }
        }
        info!(
            records = stats.records,
            failures = stats.failures,
            "ingest forwarder stopped"
        );
        stats
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
