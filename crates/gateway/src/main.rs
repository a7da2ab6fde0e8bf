use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use pk_domain::config::{Config, LogFormat, ObservabilityConfig};
use pk_gateway::api;
use pk_gateway::bootstrap;
use pk_gateway::cli::{Cli, Command, ConfigCommand};
use pk_gateway::runtime::Coordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, _config_path) = pk_gateway::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            run_server(Arc::new(config), tracer_provider).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = pk_gateway::cli::load_config()?;
            if !pk_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = pk_gateway::cli::load_config()?;
            pk_gateway::cli::config::show(&config)
        }
        Some(Command::Apps) => {
            init_cli_tracing();
            let (config, _config_path) = pk_gateway::cli::load_config()?;
            pk_gateway::cli::apps::list(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("pushkeeper {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing for the `serve` command.
///
/// When `otlp_endpoint` is configured, an OpenTelemetry layer is added so
/// every `tracing` span is also exported via OTLP/gRPC. The returned
/// provider must be shut down on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pk_gateway=debug"));

    let json = obs.log_format == LogFormat::Json;
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let compact_layer = (!json).then(|| tracing_subscriber::fmt::layer().compact());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer);

    let Some(endpoint) = &obs.otlp_endpoint else {
        registry.init();
        return None;
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}, \
                 starting without OpenTelemetry"
            );
            registry.init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.sample_rate,
        ))
        .with_resource(resource)
        .build();

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("pushkeeper"));
    registry.with(otel_layer).init();

    Some(tracer_provider)
}

/// Compact stderr-only tracing for CLI one-shot commands.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!("pushkeeper starting");

    // ── Build shared state & spawn background loops ──────────────────
    let runtime = bootstrap::build_app_state(config.clone()).await?;
    let background = CancellationToken::new();
    bootstrap::spawn_background_tasks(&runtime, background.clone()).await;
    let state = runtime.state.clone();

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("PK_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router(state.clone())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "pushkeeper listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.coordinator.clone()))
        .await
        .context("axum server error")?;

    // ── Drain deliveries ─────────────────────────────────────────────
    tracing::info!("server stopped, draining deliveries");
    state.coordinator.begin_shutdown();
    background.cancel();
    if let Err(e) = runtime.coordinator_task.await {
        tracing::error!(error = %e, "delivery coordinator task failed");
    }

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then stop admitting pushes and let the Axum
/// server shut down gracefully.
async fn shutdown_signal(coordinator: Coordinator) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }

    coordinator.begin_shutdown();
}
