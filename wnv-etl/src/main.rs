//! wnv-etl - West Nile virus risk map ETL
//!
//! Fetches the address list, geocodes it, joins the points against the
//! risk polygon layer and writes the enriched address reports that the map
//! export step consumes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wnv_common::logging::init_logging;
use wnv_etl::config::{apply_cli_overrides, load_config, CliOverrides};
use wnv_etl::services::{
    load_polygons, source_from_config, CensusGeocoder, GeocodeService, GeocoderClient,
    PipelineOptions, PipelineOrchestrator, ReportPaths, ReportWriter,
};

/// Command-line arguments for wnv-etl
#[derive(Parser, Debug)]
#[command(name = "wnv-etl")]
#[command(about = "Geocode addresses and join them against West Nile risk polygons")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/wnv/wnv-etl.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline
    Run {
        /// Label recorded on the run (map subtitle)
        #[arg(short, long)]
        label: Option<String>,

        /// Address CSV path or published sheet URL
        #[arg(short, long)]
        source: Option<String>,

        /// Risk polygon FeatureCollection file
        #[arg(short, long)]
        polygons: Option<PathBuf>,

        /// Process but do not write report files
        #[arg(long)]
        dry_run: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Run {
            label,
            source,
            polygons,
            dry_run,
        } => {
            apply_cli_overrides(&mut config, &CliOverrides { source, polygons });
            init_logging(&config.logging).context("Failed to initialize logging")?;

            info!("Starting wnv-etl");
            info!("Version: {}", env!("CARGO_PKG_VERSION"));

            if let Err(e) = run_pipeline(config, label, dry_run).await {
                error!(error = %e, "Run failed");
                return Err(e);
            }
            Ok(())
        }
    }
}

async fn run_pipeline(
    config: wnv_common::config::TomlConfig,
    label: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let polygon_path = config
        .polygons
        .path
        .clone()
        .ok_or_else(|| anyhow!("No polygon layer configured: set polygons.path or pass --polygons"))?;
    let polygons = Arc::new(
        load_polygons(&polygon_path, &config.polygons)
            .with_context(|| format!("Failed to load polygons from {}", polygon_path.display()))?,
    );

    let source = source_from_config(&config).context("Failed to configure address source")?;
    info!(source = %source.describe(), "Reading addresses");
    let rows = source.fetch().await.context("Failed to fetch addresses")?;

    let service: Arc<dyn GeocodeService> =
        Arc::new(CensusGeocoder::new(&config.geocoder).context("Failed to build geocoder")?);
    let geocoder = Arc::new(GeocoderClient::new(service, &config.geocoder));

    let orchestrator =
        PipelineOrchestrator::new(geocoder, polygons, PipelineOptions::from_config(&config))
            .context("Failed to set up pipeline")?;

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let run = orchestrator
        .run(rows, label, cancel_token)
        .await
        .context("Pipeline run failed")?;

    if dry_run {
        info!("Dry run, report files not written");
    } else {
        ReportWriter::new(ReportPaths::from_config(&config))
            .write(&run)
            .context("Failed to write reports")?;
    }

    let stats = &run.stats;
    println!("Run {}", run.run_id);
    println!("  total:      {}", stats.total);
    println!("  joined:     {} ({} in a risk polygon)", stats.joined, stats.matched);
    println!("  failed:     {}", stats.failed);
    if !stats.failed_by_reason.is_empty() {
        println!("              {}", stats.failure_breakdown());
    }
    println!("  pending:    {}", stats.pending);
    println!("  high risk:  {}", run.high_risk_records().len());
    println!("  digest:     {}", run.digest);

    if let wnv_etl::models::RunStatus::Aborted { reason } = &run.status {
        bail!("Run aborted: {}", reason);
    }

    Ok(())
}

/// Ctrl+C / SIGTERM
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
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping new geocode requests");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping new geocode requests");
        },
    }
}
