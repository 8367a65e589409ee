use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobsweep_core::SearchTask;
use jobsweep_sync::{
    preview_plan, probe_source, AppConfig, CollectionConfig, CollectionOrchestrator, StopSignal,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobsweep")]
#[command(about = "Collect job listings from several providers into one store")]
struct Cli {
    /// Collection config file; overrides JOBSWEEP_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full collection.
    Collect,
    /// Print the search plan without querying anything.
    Plan,
    /// Send a single query to one source and report what comes back.
    Probe {
        source: String,
        term: String,
        location: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut app = AppConfig::from_env()?;
    if let Some(path) = cli.config {
        app.config_path = path;
    }
    let config = CollectionConfig::from_yaml_file(&app.config_path)?;

    match cli.command.unwrap_or(Commands::Collect) {
        Commands::Collect => collect(&app, config).await,
        Commands::Plan => {
            let plan = match preview_plan(&config) {
                Ok(plan) => plan,
                Err(err) => {
                    eprintln!("configuration error: {err}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            for task in &plan {
                println!("{}", describe(task));
            }
            println!("{} tasks", plan.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe {
            source,
            term,
            location,
        } => {
            let adapter = app.build_adapter(app.adapter, &config)?;
            let report = probe_source(adapter.as_ref(), &config, &source, &term, &location).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn collect(app: &AppConfig, config: CollectionConfig) -> Result<ExitCode> {
    let (primary, fallback) = app.adapters(&config)?;
    let gateway = app.gateway().await?;

    let stop = StopSignal::new();
    let on_ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current task");
            on_ctrl_c.stop();
        }
    });

    let mut orchestrator =
        CollectionOrchestrator::new(config, primary, gateway).with_stop_signal(stop);
    if let Some(fallback) = fallback {
        orchestrator = orchestrator.with_fallback(fallback);
    }

    let stats = match orchestrator.run().await {
        Ok(stats) => stats,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(run_id = %stats.run_id, "collection complete");
    println!("{}", stats.summary_line());
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("serializing run statistics")?
    );
    Ok(ExitCode::SUCCESS)
}

fn describe(task: &SearchTask) -> String {
    let query = if task.query == task.term {
        String::new()
    } else {
        format!(" query=\"{}\"", task.query)
    };
    format!(
        "#{:<3} {} | {} | {} results={} hours={}{}",
        task.index, task.location, task.term, task.source, task.results_wanted, task.hours_old, query
    )
}
