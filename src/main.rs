//! Argus - 适配器宿主与引擎控制服务
//!
//! 入口：加载配置、初始化日志，然后执行子命令（启动 RPC 服务 / 列出适配器）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use argus::config::{load_config, AppConfig};
use argus::core::{
    EngineCleanup, PoolCleanup, RuntimeBuilder, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use argus::rpc::{serve, RpcState};

/// Argus Pilot System command line interface
#[derive(Parser)]
#[command(name = "argus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to an additional configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the RPC server
    StartServer {
        /// Listen host (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Start the engine right after the server comes up
        #[arg(long)]
        start_engine: bool,
    },

    /// List available registered adapters
    ListAdapters,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone()).context("Failed to load configuration")?;
    let _log_guard = argus::observability::init(&config.logging).context("Failed to initialize logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.max_workers.max(1))
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match cli.command {
        Commands::StartServer {
            host,
            port,
            start_engine,
        } => runtime.block_on(start_server(config, host, port, start_engine)),
        Commands::ListAdapters => {
            list_adapters(config);
            Ok(())
        }
    }
}

async fn start_server(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    start_engine: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = config.server.address();
    let grace = Duration::from_millis(config.server.shutdown_grace_ms);

    tracing::info!(app = %config.app.name, "Attempting to start RPC server...");
    let runtime = RuntimeBuilder::new(config).build();
    if start_engine {
        runtime.engine.start().context("Failed to start engine")?;
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown)).with_timeout(Duration::from_secs(5));
    coordinator.register(EngineCleanup::new(Arc::clone(&runtime.engine)));
    coordinator.register(PoolCleanup::new(Arc::clone(&runtime.pool)));

    let state = Arc::new(RpcState::new(runtime, Arc::clone(&shutdown)));
    let result = serve(listener, state, grace).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "RPC server failed");
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    }

    coordinator.run_cleanup().await;
    tracing::info!("Server shutdown complete");
    result
}

fn list_adapters(config: AppConfig) {
    tracing::info!("Listing available registered adapters...");
    let registry = RuntimeBuilder::new(config).build_registry();
    let descriptors = registry.descriptors();
    if descriptors.is_empty() {
        println!("No adapters discovered or registered.");
        return;
    }
    println!("Available adapters:");
    for descriptor in descriptors {
        let mut capabilities = Vec::new();
        if descriptor.has_perception() {
            capabilities.push("perception");
        }
        if descriptor.has_action() {
            capabilities.push("action");
        }
        println!("- {} ({})", descriptor.name, capabilities.join(", "));
    }
}
