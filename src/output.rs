//! Atomic CSV export of activity profiles and the JSON run report.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::model::ActivitySequence;

pub const OUTPUT_HEADERS: [&str; 6] = [
    "user_id",
    "activity_count",
    "activity_count_standardized",
    "activity_name",
    "badge_name",
    "week_offset",
];

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A fully written and synced temp file waiting to replace its target.
///
/// Dropping it without [`StagedFile::commit`] removes the temp file, so an
/// aborted run leaves neither the table nor a `.tmp` sibling behind.
#[derive(Debug)]
pub struct StagedFile {
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<(), WriteError> {
        fs::rename(&self.tmp_path, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Writes one row per sequence offset to a sibling `.tmp` file; returns the
/// staged file and the number of rows written.
pub fn stage_activity_profiles(
    path: &Path,
    sequences: &[ActivitySequence],
) -> Result<(StagedFile, u64), WriteError> {
    let staged = stage(path)?;
    let written = write_rows(&staged.tmp_path, sequences)?;
    Ok((staged, written))
}

pub fn stage_run_report<T: Serialize>(path: &Path, report: &T) -> Result<StagedFile, WriteError> {
    let staged = stage(path)?;
    let file = fs::File::create(&staged.tmp_path)?;
    let sync_handle = file.try_clone()?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    drop(writer);
    sync_handle.sync_all()?;
    Ok(staged)
}

/// Moves a staged table and its run report into place.
///
/// The report is committed first. If the table then fails to move, the report
/// is removed again so the pair stays all-or-nothing.
pub fn commit_outputs(profiles: StagedFile, report: StagedFile) -> Result<(), WriteError> {
    let report_path = report.target().to_path_buf();
    report.commit()?;
    if let Err(err) = profiles.commit() {
        let _ = fs::remove_file(&report_path);
        return Err(err);
    }
    Ok(())
}

pub(crate) fn log_profiles_written(path: &Path, sequences: usize, rows: u64) {
    info!(
        component = "output",
        event = "output.write.finish",
        path = %path.display(),
        sequences,
        rows
    );
}

/// `<output>.report.json` next to the CSV.
pub fn report_path_for(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".report.json");
    output_path.with_file_name(name)
}

fn stage(path: &Path) -> Result<StagedFile, WriteError> {
    let tmp_path = tmp_path_for(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(StagedFile {
        tmp_path,
        target: path.to_path_buf(),
        committed: false,
    })
}

fn write_rows(tmp_path: &Path, sequences: &[ActivitySequence]) -> Result<u64, WriteError> {
    let file = fs::File::create(tmp_path)?;
    let sync_handle = file.try_clone()?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    writer.write_record(OUTPUT_HEADERS)?;

    let mut written = 0u64;
    for sequence in sequences {
        for row in sequence.rows() {
            writer.serialize(row)?;
            written += 1;
        }
    }

    writer.flush()?;
    drop(writer);
    sync_handle.sync_all()?;
    Ok(written)
}

fn tmp_path_for(path: &Path) -> Result<PathBuf, WriteError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| WriteError::InvalidPath(path.to_path_buf()))?;
    Ok(path.with_file_name(format!("{file_name}.tmp")))
}
