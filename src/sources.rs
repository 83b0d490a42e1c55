//! CSV loading of badge, comment and post exports.
//!
//! Rows with an empty or unparseable required field are dropped and counted;
//! they never reach the range resolver. A missing required column is fatal.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ActivityDataset, ActivityType, BadgeAward, Event};

pub const BADGES_FILE: &str = "badges.csv";
pub const COMMENTS_FILE: &str = "comments.csv";
pub const POSTS_FILE: &str = "posts.csv";

// i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
const I64_MIN_F64: f64 = i64::MIN as f64;
const I64_MAX_F64: f64 = i64::MAX as f64;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {source_name}: {error}")]
    Csv {
        source_name: &'static str,
        #[source]
        error: csv::Error,
    },
    #[error("{source_name} is missing required column '{column}'")]
    MissingColumn {
        source_name: &'static str,
        column: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub rows_read: u64,
    pub rows_kept: u64,
    pub malformed_dropped: u64,
    /// Badges outside the recognized tiers, or posts that are neither
    /// questions nor answers.
    pub out_of_scope_dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub badges: SourceReport,
    pub comments: SourceReport,
    pub posts: SourceReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostsByType {
    pub questions: Vec<Event>,
    pub answers: Vec<Event>,
}

/// Parses a UTC export timestamp into epoch milliseconds.
///
/// Accepts `2016-03-01 12:34:56.789 UTC`, the same without the suffix, a `T`
/// separator, or RFC 3339. Sub-millisecond digits (`.667999`) are truncated,
/// so instants less than 1 ms apart share a timestamp and always fall into the
/// same period.
pub fn parse_utc_timestamp_ms(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let naive_part = trimmed.strip_suffix(" UTC").unwrap_or(trimmed);

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive_part, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|parsed| parsed.timestamp_millis())
}

pub fn read_badges<R: Read>(
    reader: R,
    badge_names: &[String],
) -> Result<(Vec<BadgeAward>, SourceReport), LoadError> {
    const SOURCE: &str = "badges";
    let mut csv_reader = export_reader(reader);
    let headers = read_headers(&mut csv_reader, SOURCE)?;
    let user_idx = column_index(&headers, SOURCE, "user_id")?;
    let name_idx = column_index(&headers, SOURCE, "name")?;
    let date_idx = column_index(&headers, SOURCE, "date")?;

    let mut out = Vec::new();
    let mut report = SourceReport::default();
    for record in csv_reader.records() {
        let record = record.map_err(|error| LoadError::Csv {
            source_name: SOURCE,
            error,
        })?;
        report.rows_read += 1;

        let (Some(user_id), Some(ts_ms_utc)) = (
            parse_i64_field(&record, user_idx),
            field(&record, date_idx).and_then(parse_utc_timestamp_ms),
        ) else {
            drop_malformed(SOURCE, &record, &mut report);
            continue;
        };
        let Some(raw_name) = field(&record, name_idx) else {
            drop_malformed(SOURCE, &record, &mut report);
            continue;
        };
        let Some(badge_name) = badge_names
            .iter()
            .find(|name| name.eq_ignore_ascii_case(raw_name))
        else {
            report.out_of_scope_dropped += 1;
            continue;
        };

        out.push(BadgeAward {
            user_id,
            badge_name: badge_name.clone(),
            ts_ms_utc,
        });
        report.rows_kept += 1;
    }

    Ok((out, report))
}

pub fn read_comments<R: Read>(reader: R) -> Result<(Vec<Event>, SourceReport), LoadError> {
    const SOURCE: &str = "comments";
    let mut csv_reader = export_reader(reader);
    let headers = read_headers(&mut csv_reader, SOURCE)?;
    let user_idx = column_index(&headers, SOURCE, "user_id")?;
    let date_idx = column_index(&headers, SOURCE, "creation_date")?;

    let mut out = Vec::new();
    let mut report = SourceReport::default();
    for record in csv_reader.records() {
        let record = record.map_err(|error| LoadError::Csv {
            source_name: SOURCE,
            error,
        })?;
        report.rows_read += 1;

        match (
            parse_i64_field(&record, user_idx),
            field(&record, date_idx).and_then(parse_utc_timestamp_ms),
        ) {
            (Some(user_id), Some(ts_ms_utc)) => {
                out.push(Event {
                    user_id,
                    ts_ms_utc,
                    activity: ActivityType::Comment,
                });
                report.rows_kept += 1;
            }
            _ => drop_malformed(SOURCE, &record, &mut report),
        }
    }

    Ok((out, report))
}

pub fn read_posts<R: Read>(reader: R) -> Result<(PostsByType, SourceReport), LoadError> {
    const SOURCE: &str = "posts";
    let mut csv_reader = export_reader(reader);
    let headers = read_headers(&mut csv_reader, SOURCE)?;
    let user_idx = column_index(&headers, SOURCE, "owner_user_id")?;
    let date_idx = column_index(&headers, SOURCE, "creation_date")?;
    let type_idx = column_index(&headers, SOURCE, "post_type_id")?;

    let mut out = PostsByType::default();
    let mut report = SourceReport::default();
    for record in csv_reader.records() {
        let record = record.map_err(|error| LoadError::Csv {
            source_name: SOURCE,
            error,
        })?;
        report.rows_read += 1;

        let Some(post_type_id) = parse_i64_field(&record, type_idx) else {
            drop_malformed(SOURCE, &record, &mut report);
            continue;
        };
        let Some(activity) = ActivityType::from_post_type_id(post_type_id) else {
            report.out_of_scope_dropped += 1;
            continue;
        };
        let (Some(user_id), Some(ts_ms_utc)) = (
            parse_i64_field(&record, user_idx),
            field(&record, date_idx).and_then(parse_utc_timestamp_ms),
        ) else {
            drop_malformed(SOURCE, &record, &mut report);
            continue;
        };

        let event = Event {
            user_id,
            ts_ms_utc,
            activity,
        };
        match activity {
            ActivityType::Question => out.questions.push(event),
            _ => out.answers.push(event),
        }
        report.rows_kept += 1;
    }

    Ok((out, report))
}

/// Loads `badges.csv`, `comments.csv` and `posts.csv` from `data_dir`.
pub fn load_dataset(
    data_dir: &Path,
    badge_names: &[String],
) -> Result<(ActivityDataset, LoadReport), LoadError> {
    let (badges, badges_report) = read_badges(open(&data_dir.join(BADGES_FILE))?, badge_names)?;
    log_source_loaded("badges", &badges_report);

    let (comments, comments_report) = read_comments(open(&data_dir.join(COMMENTS_FILE))?)?;
    log_source_loaded("comments", &comments_report);

    let (posts, posts_report) = read_posts(open(&data_dir.join(POSTS_FILE))?)?;
    log_source_loaded("posts", &posts_report);

    Ok((
        ActivityDataset {
            questions: posts.questions,
            answers: posts.answers,
            comments,
            badges,
        },
        LoadReport {
            badges: badges_report,
            comments: comments_report,
            posts: posts_report,
        },
    ))
}

fn export_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
}

fn open(path: &Path) -> Result<fs::File, LoadError> {
    fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    source_name: &'static str,
) -> Result<StringRecord, LoadError> {
    reader
        .headers()
        .cloned()
        .map_err(|error| LoadError::Csv { source_name, error })
}

fn column_index(
    headers: &StringRecord,
    source_name: &'static str,
    column: &'static str,
) -> Result<usize, LoadError> {
    headers
        .iter()
        .position(|header| header.trim() == column)
        .ok_or(LoadError::MissingColumn {
            source_name,
            column,
        })
}

fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record
        .get(idx)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_i64_field(record: &StringRecord, idx: usize) -> Option<i64> {
    let raw = field(record, idx)?;
    // numeric ids sometimes arrive float-formatted, e.g. "42.0"
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && (I64_MIN_F64..I64_MAX_F64).contains(v))
            .map(|v| v as i64)
    })
}

fn drop_malformed(source_name: &'static str, record: &StringRecord, report: &mut SourceReport) {
    report.malformed_dropped += 1;
    debug!(
        component = "sources",
        event = "sources.load.malformed_row",
        source = source_name,
        line = ?record.position().map(|p| p.line()),
        record = ?record
    );
}

fn log_source_loaded(source_name: &str, report: &SourceReport) {
    info!(
        component = "sources",
        event = "sources.load.finish",
        source = source_name,
        rows_read = report.rows_read,
        rows_kept = report.rows_kept
    );
    if report.malformed_dropped > 0 {
        warn!(
            component = "sources",
            event = "sources.load.dropped_rows",
            source = source_name,
            malformed_dropped = report.malformed_dropped
        );
    }
}
