use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bizsync_adapters::a8::parse_date_arg;
use bizsync_core::SyncRecord;
use bizsync_sync::config::{A8SyncConfig, KeepaCheckConfig, StripeLinksConfig};
use bizsync_sync::jobs::{
    run_a8_sync, run_keepa_check, run_stripe_links, A8SyncOptions, ApiEndpoints,
    StripeLinksOptions,
};
use bizsync_sync::{RunStatus, RunSummary};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bizsync")]
#[command(about = "Scheduled reconciliation jobs between Notion, Stripe, A8.net and Keepa")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create Stripe payment links for active products that have none.
    StripeLinks {
        /// Read products and log what would change without calling Stripe or writing to Notion.
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy A8.net result reports into Notion (or a CSV ledger) and post a LINE summary.
    A8Sync {
        /// First report date (YYYY-MM-DD); defaults to today minus A8_LOOKBACK_DAYS.
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,
        /// Last report date (YYYY-MM-DD); defaults to today.
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,
        #[arg(long)]
        use_sample_data: bool,
        #[arg(long)]
        skip_notion: bool,
        #[arg(long)]
        skip_line: bool,
        /// Sample data, no Notion, no LINE.
        #[arg(long)]
        self_test: bool,
        /// Live A8 reads, no writes, no LINE.
        #[arg(long)]
        dry_run: bool,
        /// Upsert into this CSV file instead of Notion.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Check Keepa connectivity for one ASIN and report to Slack.
    KeepaCheck {
        #[arg(long)]
        asin: Option<String>,
    },
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    parse_date_arg(text).ok_or_else(|| format!("expected a date like 2026-03-01, got {text:?}"))
}

fn print_summary<R: SyncRecord>(summary: &RunSummary<R>) {
    println!(
        "{} complete: run_id={} read={} selected={} ok={} errors={} created={} updated={} unchanged={} notified={}",
        summary.job,
        summary.run_id,
        summary.read,
        summary.selected,
        summary.ok_count(),
        summary.error_count(),
        summary.created(),
        summary.updated(),
        summary.unchanged(),
        summary.notified
    );
    for (key, message) in summary.failures() {
        println!("  failed {key}: {message}");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(err) => {
            error!(error = %format!("{err:#}"), "run aborted");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<RunStatus> {
    let endpoints = ApiEndpoints::default();

    match command {
        Commands::StripeLinks { dry_run } => {
            let config = StripeLinksConfig::from_env(dry_run)?;
            let summary =
                run_stripe_links(&config, StripeLinksOptions { dry_run }, &endpoints).await?;
            print_summary(&summary);
            Ok(summary.status())
        }
        Commands::A8Sync {
            start,
            end,
            use_sample_data,
            skip_notion,
            skip_line,
            self_test,
            dry_run,
            ledger,
        } => {
            let options = A8SyncOptions {
                start,
                end,
                use_sample_data,
                skip_notion,
                skip_line,
                self_test,
                dry_run,
                ledger,
                today: Local::now().date_naive(),
            };
            let config = A8SyncConfig::from_env(options.needs())?;
            let summary = run_a8_sync(&config, &options, &endpoints).await?;
            print_summary(&summary);
            Ok(summary.status())
        }
        Commands::KeepaCheck { asin } => {
            let config = KeepaCheckConfig::from_env()?;
            let report = run_keepa_check(&config, asin.as_deref(), &endpoints).await?;
            println!(
                "keepa-check complete: asin={} title={} notified={}",
                report.asin,
                report.title.as_deref().unwrap_or("-"),
                report.notified
            );
            Ok(RunStatus::Clean)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn a8_sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "bizsync",
            "a8-sync",
            "--start",
            "2026/03/01",
            "--self-test",
            "--ledger",
            "a8.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::A8Sync {
                start,
                self_test,
                ledger,
                ..
            } => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2026, 3, 1));
                assert!(self_test);
                assert_eq!(ledger, Some(PathBuf::from("a8.csv")));
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Cli::try_parse_from(["bizsync", "a8-sync", "--end", "yesterday"]).is_err());
    }
}
