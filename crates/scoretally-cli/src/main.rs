//! scoretally command-line front end.
//!
//! Run with: cargo run -p scoretally-cli -- ./screenshots

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Offset, Utc};
use clap::Parser;
use log::{error, info, warn};
use scoretally::export::format_score;
use scoretally::intake::collect_uploads;
use scoretally::report::{successful_rows, DisplayRow};
use scoretally::{
    format_timestamp, load_config_or_default, ExportConfig, JobState, ReportLocale, Session,
    StoreEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "scoretally",
    version,
    about = "Extract account scores from screenshots and tally them into a CSV report"
)]
struct Cli {
    /// Image files or directories (scanned recursively)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Jobs dispatched together per wave
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: Option<u32>,

    /// Directory the CSV report is written to
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Report language
    #[arg(long, value_parser = ["ja", "en"])]
    locale: Option<String>,

    /// Offset used to display timestamps, e.g. +09:00
    #[arg(long)]
    utc_offset: Option<String>,

    /// Print the report without writing the CSV file
    #[arg(long)]
    no_export: bool,
}

fn init_logging() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}

fn note(row: &DisplayRow, locale: ReportLocale) -> String {
    match row.state {
        JobState::Success if row.is_repeated_account() => locale.repeat_note(row.duplicate_count),
        JobState::Error => row.error_detail.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

fn print_report(rows: &[DisplayRow], export: &ExportConfig) {
    let offset = export.display_offset().unwrap_or_else(|| Utc.fix());
    let locale = export.locale;
    let [account, time, score, note_label] = locale.header();

    println!(
        "\n{} / {} rows succeeded\n",
        successful_rows(rows).count(),
        rows.len()
    );
    println!(
        "{:<10} {:<24} {:<20} {:>10}  {}",
        "", account, time, score, note_label
    );
    for row in rows {
        let score = if row.is_success() {
            format_score(row.score)
        } else {
            "-".to_string()
        };
        println!(
            "{:<10} {:<24} {:<20} {:>10}  {}",
            row.state.to_string(),
            row.account,
            format_timestamp(row.occurred_at, locale, offset),
            score,
            note(row, locale)
        );
    }
    println!();
}

async fn run(cli: Cli) -> scoretally::Result<bool> {
    let mut config = load_config_or_default(cli.config.as_deref())?;
    if let Some(limit) = cli.concurrency {
        config.concurrency_limit = limit as usize;
    }
    if let Some(locale) = cli.locale.as_deref() {
        config.export.locale = match locale {
            "en" => ReportLocale::En,
            _ => ReportLocale::Ja,
        };
    }
    if let Some(offset) = cli.utc_offset {
        config.export.utc_offset = offset;
    }

    let uploads = collect_uploads(&cli.paths)?;
    if uploads.is_empty() {
        warn!("No images found");
        return Ok(false);
    }

    let session = Session::from_config(&config)?;
    let mut events = session.subscribe();

    let Some(handle) = session.submit(uploads) else {
        warn!("No images submitted");
        return Ok(false);
    };
    info!(
        "Batch {} submitted, {} jobs per wave",
        handle.batch_id,
        session.concurrency_limit()
    );

    let batch_id = handle.batch_id.clone();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::JobUpdated {
                    source_name,
                    state,
                    error,
                    progress,
                    ..
                }) if state.is_terminal() => {
                    let detail = error.map(|e| format!(" ({})", e)).unwrap_or_default();
                    println!(
                        "[{}/{}] {}: {}{}",
                        progress.completed, progress.total, source_name, state, detail
                    );
                }
                Ok(StoreEvent::BatchCompleted { summary }) if summary.batch_id == batch_id => {
                    println!(
                        "Done: {} succeeded, {} failed, {} skipped",
                        summary.succeeded, summary.failed, summary.skipped
                    );
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {} progress events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let summary = match handle.wait().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Batch task failed: {}", e);
            printer.abort();
            session.clear();
            return Ok(false);
        }
    };
    if let Err(e) = printer.await {
        warn!("Progress printer stopped: {}", e);
    }
    let progress = session.progress();
    if !progress.is_done() {
        warn!(
            "{} of {} jobs left unprocessed",
            progress.total - progress.completed,
            progress.total
        );
    }

    print_report(&session.report(), session.export_config());

    let written = if cli.no_export {
        None
    } else {
        Some(session.write_export(&cli.output))
    };
    session.clear();

    if let Some(path) = written.transpose()? {
        println!("Report written to {}", path.display());
    }
    Ok(summary.failed == 0)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
