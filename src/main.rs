use std::{net::SocketAddr, path::Path, sync::Arc};

use cascader::{
    ConnectionManager, ForwardingEngine, GracefulShutdown, HttpHandler, Lifecycle,
    config::{AppConfig, ConfigValidator, load_config},
    metrics::{self, ClientMetrics},
    tracing_setup,
    utils::ShutdownReason,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a configuration file
    Validate {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Write a commented default configuration file
    Init {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the proxy (default)
    Serve {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config: AppConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_from_config(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    tracing::info!("Loaded configuration from {config_path}");

    ConfigValidator::validate(&config).context("Invalid configuration")?;
    let proxy = Arc::new(
        config
            .proxy
            .resolve()
            .context("Failed to resolve proxy configuration")?,
    );

    let client_metrics = if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("Failed to parse metrics listen address")?;
        metrics::install_prometheus_exporter(addr)?;
        Some(ClientMetrics::new(proxy.name.clone()))
    } else {
        None
    };

    let connection_manager = Arc::new(
        ConnectionManager::with_metrics(Arc::clone(&proxy), client_metrics)
            .context("Failed to create upstream client")?,
    );
    let engine = Arc::new(ForwardingEngine::new(
        Arc::clone(&proxy),
        connection_manager,
    ));

    let mut lifecycle = Lifecycle::new();
    lifecycle.register(Arc::clone(&engine) as Arc<dyn cascader::LifecycleSignal>);

    let app = Arc::new(HttpHandler::new(
        Arc::clone(&engine),
        config.max_request_body_bytes,
    ))
    .router();

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        "Cascader listening on {} and forwarding to {}://{}:{}",
        addr,
        proxy.scheme,
        proxy.host,
        proxy.port
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = Arc::clone(&graceful_shutdown);
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!("Signal handler error: {:?}", e);
                shutdown.trigger(ShutdownReason::Force);
            }
        });
    }

    lifecycle.start();

    let signal = graceful_shutdown.signal();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
    });

    let early_exit = tokio::select! {
        joined = &mut server => Some(joined),
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!(?reason, "Draining in-flight requests");
            None
        }
    };

    let server_result = match early_exit {
        Some(Ok(result)) => result.context("Server error"),
        Some(Err(e)) => Err(eyre!("Server task failed: {e}")),
        None => {
            let drained = graceful_shutdown
                .drain(async {
                    let _ = (&mut server).await;
                })
                .await;
            if !drained {
                server.abort();
            }
            Ok(())
        }
    };

    lifecycle.stop();
    tracing::info!("Graceful shutdown completed");
    server_result
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    let resolved = ConfigValidator::validate(&config).and_then(|()| config.proxy.resolve());
    match resolved {
        Ok(proxy) => {
            println!("Configuration is valid");
            println!();
            println!("   Listen address:    {}", config.listen_addr);
            println!(
                "   Upstream:          {}://{}:{}",
                proxy.scheme, proxy.host, proxy.port
            );
            println!("   Max connections:   {}", proxy.connections);
            println!("   Idle timeout:      {:?}", proxy.idle_timeout);
            println!("   Connect timeout:   {:?}", proxy.connect_timeout);
            println!("   Operation timeout: {:?}", proxy.operation_timeout);
            println!(
                "   Breaker overrides: {}",
                proxy.circuit_breaker.commands.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Write a default configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Cascader configuration

# Address the proxy listens on
listen_addr = "127.0.0.1:8080"
max_request_body_bytes = 16777216

[logging]
level = "info"
json = true
include_spans = true

[metrics]
enabled = false
listen_addr = "127.0.0.1:9000"

[proxy]
scheme = "http"            # http or https (https always dials port 443)
host = "localhost"
port = 3000
name = "cascader"
# 0 means default: 10 connections, 30s idle, 10000ms connect, 10000ms operation
connections = 0
idle_timeout_seconds = 0
connection_timeout_ms = 0
operation_timeout_ms = 0
# path_template = "/users/{id}"

[proxy.circuit_breaker.default]
enabled = true
# timeout_ms = 20000       # defaults to connect + operation timeout
max_concurrent_requests = 10
max_queue_size = 0
request_volume_threshold = 20
error_threshold_percentage = 50
sleep_window_ms = 5000
rolling_window_ms = 10000

# Per logical name overrides (logical name = "http://<inbound host>/")
# [proxy.circuit_breaker.commands."http://proxy.local:8080/"]
# max_concurrent_requests = 50
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'cascader serve --config {config_path}' to start the proxy");
    Ok(())
}
