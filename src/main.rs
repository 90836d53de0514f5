use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use defense_scraper::config::Config;
use defense_scraper::constants::DEFAULT_CONFIG_PATH;
use defense_scraper::infra::{JsonlOutputAdapter, ReqwestHttp, SystemClock};
use defense_scraper::logging;
use defense_scraper::pipeline::{PipelineOrchestrator, RunSummary, RunWarning};

const HALTED_EXIT_STATUS: u8 = 2;

#[derive(Parser)]
#[command(name = "defense_scraper")]
#[command(about = "NFL team-defense scraper producing defense-adjusted fantasy multipliers")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config (falls back to DEFENSE_SCRAPER_CONFIG, then config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and transform every configured target
    Run {
        /// Only run targets for these seasons (comma-separated)
        #[arg(long)]
        seasons: Option<String>,
        /// Override the output directory from the config
        #[arg(long)]
        output_dir: Option<String>,
    },
    /// Load and validate the config without touching the network
    CheckConfig,
}

/// 2 when a blocking signal halted the run, else 0.
fn exit_status(summary: &RunSummary) -> u8 {
    if summary.halted() {
        HALTED_EXIT_STATUS
    } else {
        0
    }
}

fn config_path(cli_value: Option<String>) -> String {
    cli_value
        .or_else(|| std::env::var("DEFENSE_SCRAPER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging("logs");

    let cli = Cli::parse();
    let path = config_path(cli.config);
    let config = Config::load(&path).with_context(|| format!("loading config from {}", path))?;

    match cli.command {
        Commands::CheckConfig => {
            info!(targets = config.targets.len(), allowed = config.fetch.allowed, "config is valid");
            println!("✅ {} is valid ({} targets)", path, config.targets.len());
            if !config.fetch.allowed {
                println!("⚠️  fetch.allowed is false: a run will not issue any request");
            }
        }
        Commands::Run { seasons, output_dir } => {
            let targets: Vec<_> = match &seasons {
                Some(list) => {
                    let wanted: Vec<&str> = list.split(',').map(|s| s.trim()).collect();
                    config
                        .targets
                        .iter()
                        .filter(|t| wanted.contains(&t.season.as_str()))
                        .cloned()
                        .collect()
                }
                None => config.targets.clone(),
            };
            if targets.is_empty() {
                warn!("no targets selected");
                println!("⚠️  No targets to run");
                return Ok(ExitCode::SUCCESS);
            }

            let out_dir = output_dir.unwrap_or_else(|| config.output.dir.clone());
            let http = Arc::new(ReqwestHttp::new(&config.fetch)?);
            let sink = Arc::new(JsonlOutputAdapter::new(&out_dir)?);
            let mut orchestrator = PipelineOrchestrator::new(&config, http, Arc::new(SystemClock), sink)?;

            println!("🚀 Running {} target(s)...", targets.len());
            let report = orchestrator.run(&targets).await?;
            let s = &report.summary;

            println!("\n📊 Run summary:");
            println!("   Pages fetched: {}", s.pages_fetched);
            println!("   Pages skipped: {}", s.pages_skipped);
            println!("   Valid records: {}", s.successes);
            println!("   Row errors: {}", s.row_errors);
            println!("   Validation rate: {:.2}%", s.validation_rate);
            println!("   Schema warnings: {}", s.schema_warnings);
            println!("   Season warnings: {}", s.season_warnings);
            println!("   Fetch give-ups: {}", s.fetch_give_ups);
            println!("   Hard stops: {}", s.hard_stops);
            println!("   Multipliers: {}", s.multipliers);
            println!("   Ranked defenses: {}", report.rankings.len());
            println!("   Skipped incomplete: {}", s.skipped_incomplete);
            println!("   Output dir: {}", out_dir);

            if !report.warnings.is_empty() {
                println!("\n⚠️  Warnings:");
                for w in &report.warnings {
                    println!("   - {}", serde_json::to_string(w)?);
                }
            }
            if s.halted() {
                error!("run halted by a blocking signal");
                for w in report.warnings.iter().filter(|w| matches!(w, RunWarning::HardStop { .. })) {
                    println!("❌ {}", serde_json::to_string(w)?);
                }
            }
            // returned rather than exited so the log guard flushes
            return Ok(ExitCode::from(exit_status(s)));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary(hard_stops: usize) -> RunSummary {
        RunSummary {
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            pages_attempted: 2,
            pages_fetched: 1,
            pages_skipped: 1,
            successes: 32,
            row_errors: 0,
            rows_rejected: 0,
            validation_rate: 100.0,
            schema_warnings: 0,
            season_warnings: 0,
            fetch_give_ups: 0,
            hard_stops,
            multipliers: 128,
            skipped_incomplete: 0,
        }
    }

    #[test]
    fn test_halted_run_exits_with_status_two() {
        assert_eq!(exit_status(&summary(1)), 2);
        assert_eq!(exit_status(&summary(0)), 0);
    }
}
