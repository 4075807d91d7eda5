//! trialscope - clinical trial lookup and annotation
//!
//! `trialscope serve` runs the HTTP service (default port 5790).
//! `trialscope lookup <NCT>` runs one annotation and prints the report as JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trialscope_annotate::types::TrialQuery;
use trialscope_annotate::{AnnotationPipeline, AppState};
use trialscope_common::config::TomlConfig;
use trialscope_common::events::EventBus;

/// Command-line arguments for trialscope
#[derive(Parser, Debug)]
#[command(name = "trialscope")]
#[command(about = "Clinical trial metadata aggregation and annotation")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long, env = "TRIALSCOPE_PORT")]
        port: Option<u16>,
    },
    /// Annotate one trial and print the report
    Lookup {
        /// Trial identifier (NCT number)
        nct_id: String,

        /// Trial title
        #[arg(long)]
        title: Option<String>,

        /// Author or investigator name (repeatable)
        #[arg(long = "author")]
        authors: Vec<String>,

        /// Intervention name (repeatable)
        #[arg(long = "intervention")]
        interventions: Vec<String>,

        /// Condition studied (repeatable)
        #[arg(long = "condition")]
        conditions: Vec<String>,

        /// Comma separated source names; all sources when omitted
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "trialscope={level},trialscope_annotate={level},trialscope_common={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging.level);

    let event_bus = EventBus::new(config.search.event_capacity);
    let pipeline = Arc::new(
        AnnotationPipeline::from_config(&config, event_bus.clone())
            .context("Failed to build annotation pipeline")?,
    );
    info!(
        sources = ?pipeline.registry().source_names(),
        "Annotation pipeline initialized"
    );

    match args.command {
        Command::Serve { port } => serve(&config, port, pipeline, event_bus).await,
        Command::Lookup {
            nct_id,
            title,
            authors,
            interventions,
            conditions,
            sources,
        } => {
            let mut query = TrialQuery::new(nct_id);
            query.title = title;
            query.authors = authors;
            query.interventions = interventions;
            query.conditions = conditions;

            let enabled = (!sources.is_empty()).then_some(sources.as_slice());
            let report = pipeline
                .run(&query, enabled)
                .await
                .with_context(|| format!("Lookup failed for {}", query.trial_id))?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(
    config: &TomlConfig,
    port: Option<u16>,
    pipeline: Arc<AnnotationPipeline>,
    event_bus: EventBus,
) -> Result<()> {
    let state = AppState::new(pipeline, event_bus);
    let app = trialscope_annotate::build_router(state);

    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, port)
        .parse()
        .context("Invalid bind address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
