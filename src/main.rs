//! Bond Monitor - terminal front end for the performance-bond oracle
//!
//! Usage:
//!   bond-monitor list
//!   bond-monitor watch BOND_01 --seconds 60
//!   bond-monitor simulate BOND_01
//!   bond-monitor log BOND_01 42.5
//!
//! Environment Variables:
//!   ORACLE_API_URL - REST base (default: http://localhost:8000)
//!   ORACLE_WS_URL - WebSocket base (default: ws://localhost:8000)
//!   ORACLE_REQUEST_TIMEOUT_MS - per-request timeout
//!   ORACLE_EXPLORER_TX_BASE - block explorer prefix for published verdicts

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solar_bond_monitor::models::AssetDraft;
use solar_bond_monitor::oracle::OracleRestClient;
use solar_bond_monitor::{Dashboard, DashboardConfig, DashboardView, PullOutcome};

#[derive(Parser, Debug)]
#[command(name = "bond-monitor")]
#[command(about = "Monitor solar performance bonds against the compliance oracle")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "BOND_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the oracle is reachable
    Health,
    /// List all assets
    List,
    /// Register a new asset
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long)]
        capacity_kw: f64,
        #[arg(long, default_value = "75")]
        threshold: f64,
        #[arg(long, default_value = "5.5")]
        rate: f64,
        /// Leave empty to let the oracle assign one
        #[arg(long)]
        bond_id: Option<String>,
        #[arg(long)]
        contract_address: Option<String>,
    },
    /// Show audit history, newest first
    History {
        bond_id: String,
        #[arg(long)]
        recent: Option<usize>,
    },
    /// Follow the live feed and print the dashboard
    Watch {
        bond_id: String,
        #[arg(long, default_value = "30")]
        seconds: u64,
    },
    /// Replay the last 30 days through the oracle
    Simulate { bond_id: String },
    /// Log today's production (kWh) and publish the verdict
    Log { bond_id: String, kwh: String },
    /// Penalty report as returned by the oracle
    Penalties { bond_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let config = DashboardConfig::load(args.config.as_deref())?;
    info!(api = %config.api_base_url, ws = %config.ws_base_url, "☀️ Bond monitor starting");

    match args.command {
        Command::Health => {
            let client = OracleRestClient::new(&config)?;
            let status = client.health().await?;
            println!("oracle: {}", status.status);
        }
        Command::List => {
            let dashboard = Dashboard::connect(&config)?;
            refresh_or_bail(&dashboard).await?;
            let view = dashboard.view();
            if view.assets.is_empty() {
                println!("no assets found");
            }
            for asset in &view.assets {
                println!(
                    "{:<12} {:<28} {:>8.1} kW  threshold {:>5.1}%  rate {:>5.2}%",
                    asset.bond_id, asset.name, asset.capacity_kw, asset.threshold, asset.base_interest_rate
                );
            }
        }
        Command::Create {
            name,
            lat,
            lon,
            capacity_kw,
            threshold,
            rate,
            bond_id,
            contract_address,
        } => {
            let dashboard = Dashboard::connect(&config)?;
            let mut draft = AssetDraft::new(name, lat, lon, capacity_kw, threshold).with_interest_rate(rate);
            if let Some(id) = bond_id {
                draft = draft.with_bond_id(id);
            }
            if let Some(address) = contract_address {
                draft = draft.with_contract_address(address);
            }
            let asset = dashboard.create_asset(&draft).await?;
            println!("created {} ({})", asset.bond_id, asset.name);
        }
        Command::History { bond_id, recent } => {
            let dashboard = open_asset(&config, &bond_id).await?;
            let view = dashboard.view_with_recent(recent.unwrap_or(config.recent_entries));
            print_history(&view, &config);
            dashboard.shutdown().await;
        }
        Command::Watch { bond_id, seconds } => {
            let dashboard = open_asset(&config, &bond_id).await?;
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);
            let mut tick = tokio::time::interval(Duration::from_secs(5));

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted");
                        break;
                    }
                    _ = tick.tick() => {
                        print_live(&dashboard.view());
                    }
                }
            }
            dashboard.shutdown().await;
        }
        Command::Simulate { bond_id } => {
            let dashboard = open_asset(&config, &bond_id).await?;
            let result = dashboard.run_batch_simulation().await;
            print_history(&dashboard.view(), &config);
            dashboard.shutdown().await;
            let report = result?;
            println!("simulated {} days", report.days);
        }
        Command::Log { bond_id, kwh } => {
            let dashboard = open_asset(&config, &bond_id).await?;
            dashboard.set_manual_input(&kwh)?;
            let result = dashboard.submit_manual_reading().await;
            print_history(&dashboard.view(), &config);
            dashboard.shutdown().await;
            let report = result?;
            println!(
                "{}: {} (tx: {})",
                report.date,
                report.receipt.verdict,
                report.receipt.tx_link.as_deref().unwrap_or("--")
            );
        }
        Command::Penalties { bond_id } => {
            let client = OracleRestClient::new(&config)?;
            let report = client.penalty_summary(&bond_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn refresh_or_bail(dashboard: &Dashboard) -> Result<()> {
    match dashboard.refresh_portfolio().await {
        PullOutcome::Failed { reason } => Err(anyhow::anyhow!("portfolio refresh failed: {}", reason)),
        _ => Ok(()),
    }
}

async fn open_asset(config: &DashboardConfig, bond_id: &str) -> Result<Dashboard> {
    let dashboard = Dashboard::connect(config)?;
    refresh_or_bail(&dashboard).await?;
    dashboard
        .select_asset(bond_id)
        .await
        .with_context(|| format!("Cannot open {}", bond_id))?;
    Ok(dashboard)
}

fn print_history(view: &DashboardView, config: &DashboardConfig) {
    if let Some(asset) = &view.selected {
        println!(
            "{} - {}  rate {:.2}%  threshold {:.1}%",
            asset.bond_id, asset.name, asset.base_interest_rate, asset.threshold
        );
    }
    let summary = &view.summary;
    println!(
        "{} days, avg PR {:.2}%, {} compliant / {} penalty / {} unpublished",
        summary.total_days, summary.average_pr, summary.compliant_days, summary.penalty_days, summary.unpublished_days
    );
    for entry in &view.recent_entries {
        let proof = entry
            .explorer_url(&config.explorer_tx_base)
            .unwrap_or_else(|| "--".to_string());
        println!("  {}  {:>6.2}%  {:<11}  {}", entry.date, entry.performance_ratio, entry.verdict, proof);
    }
}

fn print_live(view: &DashboardView) {
    let ratios: Vec<String> = view
        .live_samples
        .iter()
        .map(|s| format!("{:.1}", s.performance_ratio))
        .collect();
    match &view.selected {
        Some(asset) => println!("[{}] live: {}", asset.bond_id, ratios.join(" ")),
        None => warn!("No asset selected"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solar_bond_monitor=info,bond_monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when running from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
