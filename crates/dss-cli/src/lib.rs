// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! `dss`: runs the sleep-state pipeline described by a JSON configuration
//! over CSV recordings and event annotations.

pub mod input;
pub mod sink;

use clap::{Args, Parser, Subcommand};
use dss_core::{DssError, DssResult, ErrorCategory, EventTable, ExecutionContext, PredictionStream};
use dss_models::ModelRegistry;
use dss_pipeline::{Configuration, Pipeline, SeriesFailurePolicy, StageRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// File the metrics sink writes to, inside the model store.
pub const METRICS_FILE: &str = "metrics.jsonl";

#[derive(Parser, Debug)]
#[command(name = "dss", version, about = "Sleep-state detection pipeline over wearable recordings")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log filter (`info`, `debug`, `dss_pipeline=trace`, ...); overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the configured flow: train, cross-validate, score, tune.
    Run(DataArgs),
    /// Group k-fold cross-validation only.
    Cv(DataArgs),
    /// Hyperparameter search only.
    Tune(DataArgs),
    /// Predict every series with the stored models and write a CSV.
    Predict(PredictArgs),
    /// Check a configuration without touching data.
    Validate(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// JSON configuration document.
    #[arg(long)]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct DataArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Recordings CSV (`series_id,step,timestamp,<signals...>`).
    #[arg(long)]
    pub series: PathBuf,
    /// Events CSV (`series_id,event,step[,timestamp]`).
    #[arg(long)]
    pub events: PathBuf,
    /// Drop series whose stages fail instead of aborting.
    #[arg(long)]
    pub skip_failed_series: bool,
    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(long)]
    pub series: PathBuf,
    /// Events used for labelling; unlabelled series are predicted too.
    #[arg(long)]
    pub events: Option<PathBuf>,
    #[arg(long)]
    pub skip_failed_series: bool,
    /// Predictions CSV (`series_id,step,<channels...>`).
    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    category: &'a str,
    origin: Option<String>,
    message: String,
}

/// Installs the fmt subscriber; `--log-level` wins over `RUST_LOG`.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The JSON error envelope printed on stderr.
pub fn error_envelope(err: &DssError) -> String {
    let category: ErrorCategory = err.category();
    let envelope = ErrorEnvelope {
        error: ErrorPayload {
            category: category.as_str(),
            origin: err.origin(),
            message: err.to_string(),
        },
    };
    serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| {
        format!(
            "{{\"error\":{{\"category\":\"{}\",\"message\":\"{}\"}}}}",
            category.as_str(),
            err.to_string().replace('"', "'")
        )
    })
}

fn build_pipeline(config_path: &Path, skip_failed: bool) -> DssResult<Pipeline> {
    let config = Configuration::load(config_path)?;
    let policy = if skip_failed {
        SeriesFailurePolicy::SkipSeries
    } else {
        SeriesFailurePolicy::Abort
    };
    Ok(Pipeline::new(config, &StageRegistry::with_builtin(), ModelRegistry::with_builtin())?
        .with_failure_policy(policy))
}

fn write_json_output<T: Serialize>(payload: &T, output: Option<&Path>) -> DssResult<()> {
    let encoded = serde_json::to_string_pretty(payload)
        .map_err(|err| DssError::json("failed to serialize JSON output", err))?;
    match output {
        Some(path) => std::fs::write(path, format!("{encoded}\n"))
            .map_err(|err| DssError::io(format!("failed to write '{}'", path.display()), err)),
        None => {
            println!("{encoded}");
            Ok(())
        }
    }
}

/// Writes `series_id,step,<channels...>` rows.
pub fn write_predictions(stream: &PredictionStream, path: &Path) -> DssResult<()> {
    let to_data = |err: csv::Error| DssError::data(format!("{}: {err}", path.display()));
    let mut writer = csv::Writer::from_path(path).map_err(to_data)?;
    let mut header = vec!["series_id".to_string(), "step".to_string()];
    header.extend(stream.channels().iter().cloned());
    writer.write_record(&header).map_err(to_data)?;
    for (row, key) in stream.keys().iter().enumerate() {
        let mut record = vec![key.series_id.clone(), key.step.to_string()];
        record.extend(stream.row(row).iter().map(f64::to_string));
        writer.write_record(&record).map_err(to_data)?;
    }
    writer
        .flush()
        .map_err(|err| DssError::io(format!("failed to write '{}'", path.display()), err))
}

/// Runs `f` with a context carrying the metrics sink when `log_metrics` is set.
fn with_context<T>(
    pipeline: &Pipeline,
    f: impl FnOnce(&ExecutionContext<'_>) -> DssResult<T>,
) -> DssResult<T> {
    if !pipeline.config().log_metrics {
        return f(&ExecutionContext::new());
    }
    let path = pipeline.config().model_store_loc.join(METRICS_FILE);
    let sink = sink::JsonLinesMetricsSink::create(&path)?;
    info!(path = %path.display(), "recording metrics");
    let result = f(&ExecutionContext::new().with_metrics_sink(&sink));
    sink.flush()?;
    result
}

/// Dispatches one parsed command.
pub fn execute(cli: Cli) -> DssResult<()> {
    match cli.command {
        Command::Validate(args) => {
            let pipeline = build_pipeline(&args.config, false)?;
            let hash = pipeline.config().fingerprint()?.short();
            write_json_output(
                &serde_json::json!({
                    "valid": true,
                    "config_hash": hash,
                    "stages": pipeline.stage_kinds(),
                }),
                None,
            )
        }
        Command::Run(args) => {
            let pipeline = build_pipeline(&args.config.config, args.skip_failed_series)?;
            let (table, events) = load_data(&args.series, Some(&args.events))?;
            let report = with_context(&pipeline, |ctx| pipeline.run(table, &events, ctx))?;
            write_json_output(&report, args.output.as_deref())
        }
        Command::Cv(args) => {
            let pipeline = build_pipeline(&args.config.config, args.skip_failed_series)?;
            let (table, events) = load_data(&args.series, Some(&args.events))?;
            let report =
                with_context(&pipeline, |ctx| pipeline.cross_validate(table, &events, ctx))?;
            write_json_output(&report, args.output.as_deref())
        }
        Command::Tune(args) => {
            let pipeline = build_pipeline(&args.config.config, args.skip_failed_series)?;
            let (table, events) = load_data(&args.series, Some(&args.events))?;
            let report = with_context(&pipeline, |ctx| pipeline.tune(table, &events, ctx))?;
            write_json_output(&report, args.output.as_deref())
        }
        Command::Predict(args) => {
            let pipeline = build_pipeline(&args.config.config, args.skip_failed_series)?;
            let (table, events) = load_data(&args.series, args.events.as_deref())?;
            let stream = with_context(&pipeline, |ctx| pipeline.predict(table, &events, ctx))?;
            write_predictions(&stream, &args.output)?;
            info!(rows = stream.rows(), path = %args.output.display(), "predictions written");
            Ok(())
        }
    }
}

fn load_data(
    series: &Path,
    events: Option<&Path>,
) -> DssResult<(dss_core::SeriesTable, EventTable)> {
    let table = input::load_series(series)?;
    let events = match events {
        Some(path) => input::load_events(path)?,
        None => EventTable::default(),
    };
    Ok((table, events))
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, error_envelope};
    use clap::Parser;
    use dss_core::DssError;
    use serde_json::Value;

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "dss",
            "--log-level",
            "debug",
            "run",
            "--config",
            "c.json",
            "--series",
            "s.csv",
            "--events",
            "e.csv",
            "--skip-failed-series",
        ])
        .expect("arguments should parse");
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Run(args) => {
                assert!(args.skip_failed_series);
                assert_eq!(args.config.config.to_str(), Some("c.json"));
                assert!(args.output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn predict_requires_an_output() {
        assert!(
            Cli::try_parse_from(["dss", "predict", "--config", "c.json", "--series", "s.csv"])
                .is_err()
        );
    }

    #[test]
    fn envelope_names_category_and_origin() {
        let err = DssError::config("ensemble.weights", "1 weights given for 2 models");
        let envelope: Value =
            serde_json::from_str(&error_envelope(&err)).expect("envelope should be JSON");
        assert_eq!(envelope["error"]["category"], "config");
        assert_eq!(envelope["error"]["origin"], "ensemble.weights");
        assert!(
            envelope["error"]["message"]
                .as_str()
                .is_some_and(|m| m.contains("1 weights"))
        );
    }
}
