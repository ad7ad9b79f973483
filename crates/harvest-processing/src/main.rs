//! CLI entry point for the tonnage ingestion pipeline.

use anyhow::{Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use harvest_processing::{
    DataSummary, ExternalToolConfig, HarvestSession, IngestConfig, IngestReport,
    ProcessingError, StatisticOperation,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use tracing::{error, info};

/// Environment variable overriding the external repair program.
const REPAIR_TOOL_ENV: &str = "HARVEST_REPAIR_TOOL";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Fruit-movement tonnage ingestion and statistics",
    long_about = "Reads a monthly tonnage CSV export, repairs and normalizes it, \
                  and prints a summary plus the requested statistics.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  HARVEST_REPAIR_TOOL   Program used for external repair (default: csvclean)\n\n\
                  EXAMPLES:\n  \
                  # Summary only\n  \
                  harvest-processing -i movimientos.csv\n\n  \
                  # Trends and anomalies as JSON\n  \
                  harvest-processing -i movimientos.csv --stat trends --stat anomalies --json\n\n  \
                  # Built-in repair only\n  \
                  harvest-processing -i movimientos.csv --no-external-repair"
)]
struct Args {
    /// Path to the CSV file to ingest
    #[arg(short, long)]
    input: String,

    /// Statistic to compute (correlations, trends, descriptive, anomalies)
    ///
    /// May be given several times. Use "all" for every statistic.
    #[arg(short, long = "stat")]
    stats: Vec<String>,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the final JSON document is written.
    #[arg(long)]
    json: bool,

    /// Validate the file and stop, without repairing or normalizing
    #[arg(long)]
    check: bool,

    /// Skip the external repair tool and use only the built-in repair
    #[arg(long)]
    no_external_repair: bool,

    /// Program used for external repair (overrides HARVEST_REPAIR_TOOL)
    #[arg(long)]
    repair_tool: Option<String>,

    /// Seconds before the external repair tool is killed
    #[arg(long, default_value = "30")]
    repair_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a IngestReport,
    summary: &'a DataSummary,
    statistics: BTreeMap<&'static str, serde_json::Value>,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json);

    // Load environment variables from .env file
    dotenv().ok();

    if !Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    let operations = parse_operations(&args.stats)?;
    let config = build_config(&args)?;
    let session = HarvestSession::new(config)?;

    info!("Loading file: {}", args.input);
    let bytes = std::fs::read(&args.input)?;

    if args.check {
        return run_check(&session, &bytes, args.json);
    }

    let outcome = match session.ingest(&bytes) {
        Ok(outcome) => outcome,
        Err(e) => return report_failure(e, args.json),
    };

    let mut statistics = BTreeMap::new();
    for operation in operations {
        statistics.insert(operation.name(), session.compute(operation)?);
    }

    let summary = session.data_summary()?;

    if args.json {
        let output = JsonOutput {
            report: &outcome.report,
            summary: &summary,
            statistics,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&outcome.report, &summary);
        for (name, value) in &statistics {
            println!("\n{}", name.to_uppercase());
            println!("{}", "-".repeat(40));
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }

    Ok(())
}

fn parse_operations(names: &[String]) -> Result<Vec<StatisticOperation>> {
    if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
        return Ok(StatisticOperation::ALL.to_vec());
    }

    let mut operations = Vec::new();
    for name in names {
        let operation: StatisticOperation = name.parse()?;
        if !operations.contains(&operation) {
            operations.push(operation);
        }
    }
    Ok(operations)
}

fn build_config(args: &Args) -> Result<IngestConfig> {
    let program = args
        .repair_tool
        .clone()
        .or_else(|| env::var(REPAIR_TOOL_ENV).ok())
        .filter(|p| !p.trim().is_empty());

    let mut tool = match program {
        Some(program) => ExternalToolConfig::new(program),
        None => ExternalToolConfig::default(),
    };
    tool.timeout_secs = args.repair_timeout;

    let config = IngestConfig::builder()
        .external_tool(Some(tool))
        .use_external_repair(!args.no_external_repair)
        .build()?;
    Ok(config)
}

/// Validate only.
///
/// Uses `println!` for user-facing output; it must be visible regardless
/// of log level.
fn run_check(session: &HarvestSession, bytes: &[u8], json: bool) -> Result<()> {
    let validation = match session.check(bytes) {
        Ok(validation) => validation,
        Err(e) => return report_failure(e, json),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!("VALIDATION");
    println!("{}", "=".repeat(60));
    if validation.warnings.is_empty() {
        println!("  No issues found");
    }
    for warning in &validation.warnings {
        println!("  - {}", warning);
    }
    if validation.requires_repair(session.config().warning_repair_threshold) {
        println!("\n  Repair will run on ingest");
    }
    Ok(())
}

fn report_failure(e: ProcessingError, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&e)?);
    } else {
        error!("{}", e);
        for err in e.errors() {
            eprintln!("  error: {}", err);
        }
        for step in e.repair_log() {
            eprintln!("  repair: {}", step);
        }
    }
    Err(anyhow!("ingestion failed ({})", e.error_code()))
}

fn print_summary(report: &IngestReport, summary: &DataSummary) {
    println!("\n{}", "=".repeat(60));
    println!("INGEST SUMMARY");
    println!("{}", "=".repeat(60));
    println!(
        "  Format: {} / {:?} ({} rows x {} columns)",
        report.format.encoding, report.format.separator, report.format.rows, report.format.columns
    );
    println!("  Layout: {:?}", report.normalization.variant);

    if let Some(repair) = &report.repair {
        println!(
            "  Repaired with '{}': {} -> {} rows, {} -> {} columns",
            repair.strategy,
            repair.rows_before,
            repair.rows_after,
            repair.columns_before,
            repair.columns_after
        );
        for step in &repair.repair_log {
            println!("    - {}", step);
        }
        if let Some(warning) = &repair.data_loss_warning {
            println!("  WARNING: {}", warning);
        }
    }

    if let Some(year) = report.normalization.synthetic_year {
        println!("  WARNING: no year column, dates assume {}", year);
    }
    if summary.synthetic_dates {
        println!("  WARNING: no usable dates, rows are on a synthetic daily axis");
    }
    for note in &report.normalization.notes {
        println!("  Note: {}", note);
    }

    println!();
    println!("  Records: {}", summary.total_records);
    if let Some(range) = &summary.date_range {
        println!("  Dates: {} to {}", range.start, range.end);
    }
    println!("  Movement types: {}", summary.movement_types);
    for category in &report.categories {
        println!("    - {}", category);
    }
    println!("  Total tonnage: {:.2}", summary.total_tonnage);
    println!("  Monthly average: {:.2}", summary.monthly_average);
    println!("  Processed in {} ms", report.duration_ms);
}
