//! flowbook - Binance USDT-futures market data engine
//!
//! Three long-lived threads: the transport thread (this one) owns the venue
//! session and the producer end of the hand-off ring; the engine thread
//! owns the order book and trade statistics; the broadcast thread owns the
//! local fan-out endpoint. The ring is the only data path between transport
//! and engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowbook::feed::ResyncRequest;
use flowbook::messages::FeedStatus;
use flowbook::output::{BroadcastServer, ConsoleSink, OutputSink, Telemetry};
use flowbook::{Config, Engine, FeedManager};

#[derive(Parser, Debug)]
#[command(name = "flowbook", version, about = "Binance futures order book and trade flow engine")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trading symbol, e.g. btcusdt
    #[arg(short, long)]
    symbol: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    // CLI flags override everything the loader produced
    let mut config = Config::load(cli.config.as_deref());
    if let Some(symbol) = cli.symbol {
        config.network.symbol = symbol.to_lowercase();
    }
    let config = Arc::new(config);

    info!(
        symbol = %config.network.symbol,
        ws = %config.ws_stream_url(),
        broadcast_port = config.output.broadcast_port,
        queue_capacity = config.engine.queue_capacity,
        "Starting flowbook"
    );

    let telemetry = Arc::new(Telemetry::new());
    let status = Arc::new(FeedStatus::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let resync = Arc::new(ResyncRequest::new());

    // fatal if the local ports cannot be bound
    let mut broadcast = BroadcastServer::start(
        config.output.broadcast_port,
        config.output.health_port,
        Arc::clone(&telemetry),
        Arc::clone(&status),
    )?;

    let (producer, consumer) = flowbook::ring::channel(config.engine.queue_capacity);

    let engine = Engine::new(
        &config,
        consumer,
        OutputSink::new(ConsoleSink::new(), broadcast.handle()),
        Arc::clone(&resync),
        Arc::clone(&shutdown),
        Arc::clone(&telemetry),
    );
    let engine_thread = std::thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || engine.run())?;

    // ctrl-c / SIGTERM flip the shutdown flag; the transport loop notices
    // on its next service tick
    let signal_shutdown = Arc::clone(&shutdown);
    ctrlc_handler(move || {
        info!("Shutdown signal received");
        signal_shutdown.store(true, Ordering::SeqCst);
    });

    // the transport runs on the main thread until shutdown
    let manager = FeedManager::new(
        Arc::clone(&config),
        producer,
        Arc::clone(&resync),
        Arc::clone(&shutdown),
        Arc::clone(&status),
        Arc::clone(&telemetry),
    );
    manager.run();

    if engine_thread.join().is_err() {
        warn!("Engine thread panicked");
    }
    broadcast.stop();

    info!("Shutdown complete");
    Ok(())
}

/// Install a signal handler on a dedicated watcher thread.
fn ctrlc_handler(on_signal: impl FnOnce() + Send + 'static) {
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "Signal watcher failed to start");
                    return;
                }
            };
            rt.block_on(async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{signal, SignalKind};
                    let mut term = match signal(SignalKind::terminate()) {
                        Ok(term) => term,
                        Err(e) => {
                            warn!(error = %e, "SIGTERM handler unavailable");
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = tokio::signal::ctrl_c().await;
                }
            });
            on_signal();
        })
        .expect("failed to spawn signal watcher");
}
