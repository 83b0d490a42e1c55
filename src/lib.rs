//! Badge activity preprocessing.
//!
//! Builds per-award activity windows (questions, answers, comments) for every
//! badge holder and exports them as one flat table:
//! - range resolution over the overlapping coverage of all activity sources
//! - windowed counting with edge-validity masking and z-score standardization
//! - zero/missing backfill for badge holders without activity of a type

mod aggregate;
mod config;
mod model;
mod observability;
mod output;
mod pipeline;
mod range;
mod sources;
mod window;

pub use aggregate::{
    active_sequence, backfill_sequence, build_activity_sequences, AggregateError, SequenceBatch,
};
pub use config::{
    parse_period_ms, pipeline_config_from_env, validate_config, ConfigError, PipelineConfig,
    DEFAULT_BADGE_NAMES, DEFAULT_OUTPUT_FILE,
};
pub use model::{
    ActivityDataset, ActivityProfileRow, ActivitySequence, ActivityType, BadgeAward, Event,
    SequenceOrigin, ValidRange, ALL_ACTIVITY_TYPES,
};
pub use observability::{
    init_logging, log_app_start, log_pipeline_config, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use output::{
    commit_outputs, report_path_for, stage_activity_profiles, stage_run_report, StagedFile,
    WriteError, OUTPUT_HEADERS,
};
pub use pipeline::{process_dataset, run_pipeline, PipelineError, PipelineReport};
pub use range::{
    filter_to_valid_range, resolve_and_filter, resolve_valid_range, DataRangeError,
    RetainedCounts,
};
pub use sources::{
    load_dataset, parse_utc_timestamp_ms, read_badges, read_comments, read_posts, LoadError,
    LoadReport, PostsByType, SourceReport, BADGES_FILE, COMMENTS_FILE, POSTS_FILE,
};
pub use window::{z_standardize, WindowConfig, DAY_MS, HOUR_MS, WEEK_MS};
