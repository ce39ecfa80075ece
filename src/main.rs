// ABOUTME: Main entry point for the confab gateway server
// ABOUTME: Initializes logging, config, engine wiring, and the axum transport

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use confab::codec::SegmentCodec;
use confab::config::Config;
use confab::connection::ConnectionRegistry;
use confab::gateway::{self, GatewayState};
use confab::robot::ApiClient;
use confab_core::{Context, Dispatcher, EventClass, Flow};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "confab",
    about = "Chat-protocol gateway with suspendable conversation handlers"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "confab.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server
    Server,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC! Gateway crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Initialize logging: stdout plus a daily-rolling file, guard held for
    // process lifetime so buffered lines flush on exit
    std::fs::create_dir_all("logs").context("Failed to create logs directory")?;
    let file_appender = tracing_appender::rolling::daily("logs", "confab.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    match cli.command {
        Command::Server => run_server(&cli.config).await,
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    tracing::info!("Starting confab gateway");

    let config = Config::load(config_path)?;
    tracing::info!(
        addr = %config.bind_addr(),
        api_timeout_secs = config.protocol.api_timeout_secs,
        wait_secs = config.protocol.default_wait_secs,
        token_protected = config.server.access_token.is_some(),
        "Configuration loaded"
    );

    let registry = ConnectionRegistry::new();
    let outbound = Arc::new(ApiClient::new(registry.clone(), config.api_timeout()));
    let dispatcher = Arc::new(Dispatcher::new(
        outbound,
        Arc::new(SegmentCodec),
        config.context_config(),
    ));
    register_builtin_handlers(&dispatcher);

    // Initialize Prometheus metrics
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to initialize Prometheus metrics")?;

    let state = GatewayState {
        dispatcher: Arc::clone(&dispatcher),
        registry,
        config: Arc::new(config),
    };
    let addr = state.config.bind_addr();
    let app = gateway::router(state, metrics_handle);

    let shutdown_dispatcher = Arc::clone(&dispatcher);
    gateway::serve(&addr, app, async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        // Abrupt teardown: parked conversations are dropped, not resumed
        shutdown_dispatcher.shutdown();
    })
    .await
}

/// Handlers the gateway always carries; embedders register their own on top.
fn register_builtin_handlers(dispatcher: &Dispatcher) {
    dispatcher.register(
        EventClass::Connect,
        "log_connect",
        |context: Context| async move {
            tracing::info!(self_id = ?context.self_id(), "Bot connection established");
            Ok(Flow::Continue)
        },
    );
    dispatcher.register(
        EventClass::Disconnect,
        "log_disconnect",
        |context: Context| async move {
            tracing::info!(self_id = ?context.self_id(), "Bot connection closed");
            Ok(Flow::Continue)
        },
    );
    dispatcher.on_message("trace_message", |context: Context| async move {
        tracing::debug!(
            user_id = ?context.user_id(),
            message_type = ?context.message_type(),
            message = ?context.message_text(),
            "Inbound message"
        );
        Ok(Flow::Continue)
    });
}
