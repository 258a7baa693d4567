//! LabelBatch CLI - run label jobs from JSON job files
//!
//! Commands: validate, run, plan
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a job is rejected or fails

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use labelbatch_core::source::SourceOpener;
use labelbatch_core::{BatchJob, BatchPrinter, DefaultOpener, JobConfig, Progress, Scene};

#[derive(Parser)]
#[command(name = "labelbatch-cli")]
#[command(about = "LabelBatch CLI - variable-data label printing and export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a job's configuration and data sources
    Validate {
        /// Path to the job file
        #[arg(short, long)]
        job: PathBuf,
    },

    /// Validate and render a job
    Run {
        /// Path to the job file
        #[arg(short, long)]
        job: PathBuf,
    },

    /// Show where instances land on the output pages
    Plan {
        /// Path to the job file
        #[arg(short, long)]
        job: PathBuf,

        /// Number of instances to place
        #[arg(short, long)]
        count: Option<usize>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "labelbatch_core=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn opener() -> Arc<dyn SourceOpener> {
    #[cfg(feature = "duckdb")]
    let opener = DefaultOpener::with_duckdb();
    #[cfg(not(feature = "duckdb"))]
    let opener = DefaultOpener::new();
    Arc::new(opener)
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("cannot serialize output: {}", e),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let path = match &cli.command {
        Commands::Validate { job } | Commands::Run { job } | Commands::Plan { job, .. } => job,
    };
    let config = match JobConfig::load(path) {
        Ok(c) => c,
        Err(e) => {
            emit(&json!({ "success": false, "kind": "configuration", "error": e.to_string() }));
            return ExitCode::FAILURE;
        }
    };

    let printer = BatchPrinter::new(opener());

    match cli.command {
        Commands::Validate { .. } => {
            if let Some(copies) = config.copies {
                emit(&json!({ "valid": copies > 0, "copies": copies }));
                return if copies > 0 { ExitCode::SUCCESS } else { ExitCode::from(2) };
            }
            let (job, scene, _) = config.into_parts();
            match printer.validate(&job, &scene) {
                Ok(result) => {
                    emit(&result);
                    if result.valid {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2) // Validation failure
                    }
                }
                Err(e) => {
                    emit(&json!({ "valid": false, "result": e.to_render_result() }));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Run { .. } => {
            let copies = config.copies;
            let (job, scene, output) = config.into_parts();
            let mut surface = match output.open_surface() {
                Ok(s) => s,
                Err(e) => {
                    emit(&json!({ "success": false, "kind": "configuration", "error": e.to_string() }));
                    return ExitCode::from(2);
                }
            };

            let progress = |p: Progress| debug!(position = p.position, total = p.total, record = ?p.record, "progress");
            let result = match copies {
                Some(n) => printer.run_copies(&scene, n, &job.arrangement, Some(surface.as_mut()), progress),
                None => printer.run(&job, &scene, Some(surface.as_mut()), progress),
            };

            match result {
                Ok(report) => {
                    emit(&json!({ "success": true, "result": report.result(), "report": report }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    emit(&json!({ "success": false, "result": e.to_render_result() }));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Plan { count, .. } => {
            let count = match count.or_else(|| config.copies.map(|c| c as usize)) {
                Some(n) => n,
                None => match planned_records(&printer, &config.job, &config.scene) {
                    Ok(n) => n,
                    Err(message) => {
                        emit(&json!({ "success": false, "kind": "configuration", "error": message }));
                        return ExitCode::from(2);
                    }
                },
            };

            match config.job.arrangement.plan(config.scene.size, count) {
                Ok(plan) => {
                    emit(&plan);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    emit(&json!({ "success": false, "kind": "configuration", "error": e.to_string() }));
                    ExitCode::from(2)
                }
            }
        }
    }
}

/// Number of records a run would render, counted by opening the job's sources.
fn planned_records(printer: &BatchPrinter, job: &BatchJob, scene: &Scene) -> Result<usize, String> {
    let result = printer.validate(job, scene).map_err(|e| e.to_string())?;
    if let Some(violation) = result.first_error() {
        return Err(format!("record count unknown: {}", violation.message));
    }
    result
        .record_count()
        .and_then(|total| job.range.resolve(total))
        .map(|(start, end)| end + 1 - start)
        .ok_or_else(|| "record count unknown; pass --count".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelbatch_core::source::Delimiter;
    use labelbatch_core::{Binding, Element, Rect, RecordRange, Size, SourceConfig, SourceDescriptor};

    fn job(text: &str) -> BatchJob {
        BatchJob::new()
            .with_source(SourceConfig::new(
                "items",
                SourceDescriptor::InlineTable {
                    text: text.into(),
                    delimiter: Delimiter::Newline,
                    field_separator: None,
                    header: false,
                },
            ))
            .with_binding(Binding::new("title", "items", 0usize))
    }

    fn scene() -> Scene {
        Scene::new(Size::new(50.0, 30.0)).with_element(Element::text("title", Rect::new(1.0, 1.0, 48.0, 10.0), ""))
    }

    #[test]
    fn test_plan_counts_records_from_sources() {
        let printer = BatchPrinter::default();
        assert_eq!(planned_records(&printer, &job("a\nb\nc\nd"), &scene()), Ok(4));

        let ranged = job("a\nb\nc\nd").with_range(RecordRange::new(2, 3));
        assert_eq!(planned_records(&printer, &ranged, &scene()), Ok(2));
    }

    #[test]
    fn test_plan_count_unknown_without_usable_source() {
        let printer = BatchPrinter::default();
        let job = BatchJob::new()
            .with_source(SourceConfig::unconfigured("items"))
            .with_binding(Binding::new("title", "items", 0usize));

        let message = planned_records(&printer, &job, &scene()).unwrap_err();
        assert!(message.starts_with("record count unknown"), "{}", message);
    }
}
