//! gps-listener: TCP listener + CLI for GPS tracking devices.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use gps_core::config::{self, Config};
use gps_core::{Dispatcher, Protocol};

mod capture;
mod codec;
mod error;
mod ingest;
mod listener;
mod session;

use ingest::{LocationSink, LogSink, WebhookSink};
use listener::Listener;

#[derive(Parser)]
#[command(name = "gps-listener", version, about = "GPS tracker protocol listener")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept device connections until Ctrl-C
    Serve {
        /// Config file (defaults to ~/.gps-listener/config.yaml)
        #[arg(long, env = "GPS_LISTENER_CONFIG")]
        config: Option<PathBuf>,

        /// Address to bind every protocol port on
        #[arg(long, env = "GPS_LISTENER_HOST")]
        host: Option<String>,

        /// Seconds without traffic before a connection is closed
        #[arg(long, env = "GPS_LISTENER_IDLE_TIMEOUT")]
        idle_timeout: Option<u64>,

        /// Seconds to let sessions finish on shutdown
        #[arg(long, env = "GPS_LISTENER_GRACE_PERIOD")]
        grace_period: Option<u64>,

        /// POST every decoded location to this URL
        #[arg(long, env = "GPS_LISTENER_WEBHOOK")]
        webhook: Option<String>,
    },

    /// Decode captured frames from a file and print a location table
    Decode {
        /// Protocol the capture was recorded with
        #[arg(short, long)]
        protocol: Protocol,

        /// Path to file containing frames (one per line, `-` for stdin)
        file: PathBuf,

        /// Lines are hex dumps (required for binary protocols)
        #[arg(long)]
        hex: bool,
    },

    /// Write a default config file
    Config {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            idle_timeout,
            grace_period,
            webhook,
        } => {
            let mut config = match config {
                Some(path) => config::load_config_from(&path).unwrap_or_else(|e| {
                    eprintln!("Error loading {}: {e}", path.display());
                    std::process::exit(1);
                }),
                None => config::load_config(),
            };
            if let Some(host) = host {
                config.listener.host = host;
            }
            if let Some(secs) = idle_timeout {
                config.listener.idle_timeout_secs = secs;
            }
            if let Some(secs) = grace_period {
                config.listener.grace_period_secs = secs;
            }
            if webhook.is_some() {
                config.webhook = webhook;
            }
            cmd_serve(config).await
        }
        Commands::Decode {
            protocol,
            file,
            hex,
        } => cmd_decode(protocol, file, hex),
        Commands::Config { force } => cmd_config(force),
    }
}

async fn cmd_serve(config: Config) {
    let dispatcher = Dispatcher::from_ports(&config.ports);

    let mut sinks: Vec<Arc<dyn LocationSink>> = vec![Arc::new(LogSink)];
    let sink_timeout = config.ingest.sink_timeout();
    if let Some(url) = &config.webhook {
        let webhook = match WebhookSink::new(url, sink_timeout) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "cannot build webhook client");
                std::process::exit(1);
            }
        };
        info!(url = webhook.url(), "forwarding locations to webhook");
        sinks.push(Arc::new(webhook));
    }
    let (tx, rx) = ingest::channel(config.ingest.queue_capacity);
    let forwarder = ingest::spawn_forwarder(rx, sinks, sink_timeout);

    let handle = match Listener::start(&config, dispatcher, tx).await {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "listener failed to start");
            std::process::exit(1);
        }
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        ports = handle.local_addrs().len(),
        "gps-listener running, Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot wait for Ctrl-C, shutting down");
    }
    handle.stop().await;

    // Sessions are gone, so the queue closes once drained
    match forwarder.await {
        Ok(stats) => info!(records = stats.records, failures = stats.failures, "shutdown complete"),
        Err(e) => error!(error = %e, "ingest forwarder failed"),
    }
}

fn cmd_decode(protocol: Protocol, file: PathBuf, hex: bool) {
    if !protocol.is_text() && !hex {
        eprintln!("{protocol} frames are binary; pass --hex with one hex frame per line");
        std::process::exit(1);
    }

    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let report = capture::decode_capture(protocol, reader, hex);
    capture::print_report(&report);
}

fn cmd_config(force: bool) {
    let path = config::config_file();
    if path.exists() && !force {
        eprintln!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
        std::process::exit(1);
    }
    match config::save_config(&Config::default()) {
        Ok(path) => println!("Wrote {}", path.display()),
        Err(e) => {
            eprintln!("Error writing config: {e}");
            std::process::exit(1);
        }
    }
}
