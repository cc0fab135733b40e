//! # rc-link
//!
//! Drives an RF module over a serial port: frames the byte stream, brings
//! the module up, tracks command acks and keeps channel data flowing.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use rc_link::clock::MonotonicClock;
use rc_link::config::{Config, LoggingConfig};
use rc_link::error::LinkError;
use rc_link::events::EventBus;
use rc_link::serial::{self, ModuleSerial};
use rc_link::session::protocol::LinkStatus;
use rc_link::session::LinkSession;
use rc_link::telemetry::{self, FrameTraceWriter};
use rc_link::transport::{ChannelSink, Transport};

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Packed frames queued for the serial writer
const WRITER_QUEUE_DEPTH: usize = 64;

/// Seconds between stats log lines
const STATS_INTERVAL_SECS: u64 = 10;

/// Priority of the frame trace subscriber (after everything else)
const TRACE_PRIORITY: u8 = 200;

/// Set up console logging, plus a daily-rotated file when configured
///
/// `RUST_LOG` overrides the configured level. The returned guard must be
/// kept alive for the file writer to flush.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match config.file.as_deref().map(Path::new) {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| "rc-link.log".as_ref());
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Main entry point for rc-link
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, default `config/default.toml`)
///    - Set up logging
///    - Build the codec and transport, attach the frame trace if enabled
///    - Open the serial port and spawn the reader and writer tasks
///
/// 2. **Main Loop**
///    - Poll the session every `poll_interval_ms`
///    - Start pairing once the module idles in standby (when configured)
///    - Log transport and session stats every 10 seconds
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if the configuration is invalid or the serial port cannot
/// be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("rc-link v{} starting...", env!("CARGO_PKG_VERSION"));

    let codec = config.transport.build_codec()?;
    let transport_config = config.transport.transport_config(&codec);
    let (sink, frames_rx) = ChannelSink::new(WRITER_QUEUE_DEPTH);
    let events = Arc::new(EventBus::new());
    let transport = Transport::new(transport_config, codec, sink)?.with_events(events.clone());

    if config.telemetry.enabled {
        let writer = FrameTraceWriter::new(
            &config.telemetry.log_dir,
            config.telemetry.max_records_per_file,
        )?;
        telemetry::attach(Arc::new(Mutex::new(writer)), &events, transport.name(), TRACE_PRIORITY);
        info!("Frame trace enabled in {}", config.telemetry.log_dir);
    }

    let module = ModuleSerial::open(&config.serial.port, config.serial.baud_rate)?;
    info!("RF module serial port opened at: {}", module.device_path());

    let (reader, writer) = module.split();
    let ingress = transport.ingress();
    let reader_task = tokio::spawn(serial::run_reader(
        reader,
        ingress.clone(),
        config.serial.read_chunk,
    ));
    let writer_task = tokio::spawn(serial::run_writer(writer, frames_rx, ingress));

    let mut session = LinkSession::new(transport, MonotonicClock::new(), config.session.clone());
    let mut poll_interval = interval(Duration::from_millis(config.transport.poll_interval_ms));
    let mut stats_interval = interval(Duration::from_secs(STATS_INTERVAL_SECS));
    let mut pairing_started = false;

    info!(
        "Polling every {} ms with {} codec",
        config.transport.poll_interval_ms, config.transport.codec
    );
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {
                match session.poll() {
                    Ok(frames) => {
                        for frame in frames {
                            debug!("Frame cmd=0x{:02X} ({} bytes)", frame.command, frame.payload.len());
                        }
                    }
                    Err(LinkError::BringUpFailed { attempts }) => {
                        error!("RF module not responding after {} probes; restart required", attempts);
                    }
                    Err(e) => warn!("Poll failed: {}", e),
                }

                if !pairing_started
                    && session.is_initialized()
                    && session.status() == LinkStatus::Standby
                {
                    if let Some(pairing) = &config.pairing {
                        match session.start_pairing(pairing) {
                            Ok(()) => pairing_started = true,
                            Err(e) => warn!("Failed to start pairing: {}", e),
                        }
                    }
                }
            }

            _ = stats_interval.tick() => {
                let transport_stats = serde_json::to_string(&session.transport().stats())?;
                let session_stats = serde_json::to_string(&session.stats())?;
                info!("Transport stats: {}", transport_stats);
                info!(
                    "Session stats: {} (status {:?}, awaiting ack: {})",
                    session_stats,
                    session.status(),
                    session.awaiting_ack()
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    reader_task.abort();
    writer_task.abort();
    info!("Final session state: {:?}", session);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file_loads() {
        let config = Config::load(DEFAULT_CONFIG_PATH).unwrap();
        assert_eq!(config.session.ack_timeout_ms, 500);
        assert!(config.transport.build_codec().is_ok());
    }
}
