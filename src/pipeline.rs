//! End-to-end preprocessing run: load, resolve range, aggregate, write.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::aggregate::{build_activity_sequences, AggregateError, SequenceBatch};
use crate::config::{validate_config, ConfigError, PipelineConfig};
use crate::model::{ActivityDataset, ValidRange};
use crate::output::{
    commit_outputs, log_profiles_written, report_path_for, stage_activity_profiles,
    stage_run_report, WriteError,
};
use crate::range::{resolve_and_filter, DataRangeError, RetainedCounts};
use crate::sources::{load_dataset, LoadError, LoadReport};
use crate::window::WindowConfig;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    DataRange(#[from] DataRangeError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub window: WindowConfig,
    pub valid_range: ValidRange,
    pub load: LoadReport,
    pub retained: RetainedCounts,
    pub active_sequences: u64,
    pub backfilled_sequences: u64,
    pub output_rows: u64,
}

/// Range resolution and aggregation over an in-memory dataset.
pub fn process_dataset(
    dataset: ActivityDataset,
    window: &WindowConfig,
    threads: usize,
) -> Result<(ValidRange, RetainedCounts, SequenceBatch), PipelineError> {
    let (range, filtered, retained) = resolve_and_filter(dataset)?;
    let batch = build_activity_sequences(&filtered, &range, window, threads)?;
    Ok((range, retained, batch))
}

/// Full run from the CSV exports in `config.data_dir` to `config.output_path`.
///
/// The table and its report are both staged before either replaces its target,
/// so a failed run never leaves a fresh table without its report.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    validate_config(config)?;

    let (dataset, load) = load_dataset(&config.data_dir, &config.badge_names)?;
    let (valid_range, retained, batch) = process_dataset(dataset, &config.window, config.threads)?;

    let (profiles, output_rows) = stage_activity_profiles(&config.output_path, &batch.sequences)?;
    let report = PipelineReport {
        window: config.window,
        valid_range,
        load,
        retained,
        active_sequences: batch.active_sequences,
        backfilled_sequences: batch.backfilled_sequences,
        output_rows,
    };
    let report_file = stage_run_report(&report_path_for(&config.output_path), &report)?;
    commit_outputs(profiles, report_file)?;
    log_profiles_written(&config.output_path, batch.sequences.len(), output_rows);

    info!(
        component = "preprocess",
        event = "pipeline.finish",
        output_path = %config.output_path.display(),
        first_ts_ms_utc = report.valid_range.first_ts_ms_utc,
        last_ts_ms_utc = report.valid_range.last_ts_ms_utc,
        active_sequences = report.active_sequences,
        backfilled_sequences = report.backfilled_sequences,
        output_rows = report.output_rows
    );

    Ok(report)
}
