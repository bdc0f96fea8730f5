//! Bounded batch recorder.
//!
//! Values are buffered in memory and written as one JSON array per batch once
//! the buffer reaches `max_size`. A failed write keeps the batch, so the next
//! `record` call attempts the flush again with the new entry appended.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use super::error::{InsightError, Result};
use super::types::{FlushReport, RecordEntry, RecordValue};

pub const DEFAULT_RECORDER_NAME: &str = "recorder";
pub const DEFAULT_RECORDER_DIRECTORY: &str = "records";
pub const DEFAULT_RECORDER_MAX_SIZE: usize = 1000;

/// Timestamp layout of a record entry, e.g. `10/19/2026, 3:04:05 PM`.
const ENTRY_TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub name: String,
    pub directory: PathBuf,
    pub max_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: DEFAULT_RECORDER_NAME.to_string(),
            directory: PathBuf::from(DEFAULT_RECORDER_DIRECTORY),
            max_size: DEFAULT_RECORDER_MAX_SIZE,
        }
    }
}

#[derive(Debug)]
pub struct BatchRecorder {
    name: String,
    directory: PathBuf,
    max_size: usize,
    records: Vec<RecordEntry>,
}

impl BatchRecorder {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>, max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(InsightError::InvalidConfig("recorder max_size must be at least 1".to_string()));
        }

        Ok(Self {
            name: name.into(),
            directory: directory.into(),
            max_size,
            records: Vec::with_capacity(max_size),
        })
    }

    pub fn from_config(config: &RecorderConfig) -> Result<Self> {
        Self::new(config.name.clone(), config.directory.clone(), config.max_size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Entries waiting for the next flush.
    pub fn pending(&self) -> &[RecordEntry] {
        &self.records
    }

    /// Appends a value stamped with the local time.
    ///
    /// Returns `Ok(Some(report))` when this entry completed a batch that was
    /// written, `Ok(None)` while the batch is still filling.
    pub fn record(&mut self, value: impl Into<RecordValue>) -> Result<Option<FlushReport>> {
        self.record_at(Local::now(), value)
    }

    pub fn record_at(&mut self, now: DateTime<Local>, value: impl Into<RecordValue>) -> Result<Option<FlushReport>> {
        self.records.push(RecordEntry {
            timestamp: now.format(ENTRY_TIMESTAMP_FORMAT).to_string(),
            value: value.into(),
        });

        if self.records.len() < self.max_size {
            return Ok(None);
        }

        self.flush(now).map(Some)
    }

    fn flush(&mut self, now: DateTime<Local>) -> Result<FlushReport> {
        let contents = serde_json::to_vec(&self.records)?;

        fs::create_dir_all(&self.directory)?;
        let path = unique_artifact_path(&self.directory, &self.name, &now);

        write_artifact(&path, |file| file.write_all(&contents))?;

        let report = FlushReport {
            artifact: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
            entries: self.records.len(),
        };
        self.records.clear();

        log::debug!("Flushed {} records to {}", report.entries, report.path.display());

        Ok(report)
    }
}

/*
* @brief Write an artifact under a staging name and move it into place once synced.
* @param path Final artifact path
* @param write Fills the staging file
* @note On any failure the staging file is removed, `path` is never created.
*/
fn write_artifact(path: &Path, write: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
    let staging = staging_path(path);
    let mut file = OpenOptions::new().write(true).create_new(true).open(&staging)?;

    let result = write(&mut file)
        .and_then(|()| file.sync_all())
        .and_then(|()| fs::rename(&staging, path));

    if let Err(e) = result {
        drop(file);
        if let Err(cleanup) = fs::remove_file(&staging) {
            log::warn!("Could not remove {}: {}", staging.display(), cleanup);
        }
        return Err(e.into());
    }

    Ok(())
}

/// Hidden sibling of `path` used while the batch is being written.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

/*
* @brief Artifact name for a flush at `now`: <name>_<D>_<M>_<YYYY>_<H>_<M>_<S>.json
* @note A `_<n>` suffix is added while the name is taken (several flushes in one second).
*/
fn unique_artifact_path(directory: &Path, name: &str, now: &DateTime<Local>) -> PathBuf {
    let stem = format!(
        "{}_{}_{}_{}_{}_{}_{}",
        name,
        now.day(),
        now.month(),
        now.year(),
        now.hour(),
        now.minute(),
        now.second()
    );

    let mut path = directory.join(format!("{}.json", stem));
    let mut counter: u32 = 1;
    while path.exists() {
        path = directory.join(format!("{}_{}.json", stem, counter));
        counter += 1;
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    fn read_batch(path: &Path) -> Vec<RecordEntry> {
        let bytes = fs::read(path).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn two_records_do_not_flush() {
        let dir = tempdir().unwrap();
        let mut recorder = BatchRecorder::new("power", dir.path(), 3).unwrap();

        assert!(recorder.record(1.0).unwrap().is_none());
        assert!(recorder.record(2.0).unwrap().is_none());
        assert_eq!(recorder.len(), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn third_record_flushes_whole_batch_in_order() {
        let dir = tempdir().unwrap();
        let mut recorder = BatchRecorder::new("power", dir.path(), 3).unwrap();

        recorder.record_at(at(15, 4, 5), 1.5).unwrap();
        recorder.record_at(at(15, 4, 5), "idle").unwrap();
        let report = recorder.record_at(at(15, 4, 6), 3.5).unwrap().unwrap();

        assert_eq!(report.entries, 3);
        assert_eq!(report.artifact, "power_19_10_2026_15_4_6.json");
        assert!(recorder.is_empty());

        let batch = read_batch(&report.path);
        assert_eq!(
            batch.iter().map(|e| e.value.clone()).collect::<Vec<_>>(),
            vec![RecordValue::Number(1.5), RecordValue::Text("idle".into()), RecordValue::Number(3.5)]
        );
        assert_eq!(batch[0].timestamp, "10/19/2026, 3:04:05 PM");
    }

    #[test]
    fn flushes_in_the_same_second_get_distinct_names() {
        let dir = tempdir().unwrap();
        let mut recorder = BatchRecorder::new("power", dir.path(), 1).unwrap();

        let first = recorder.record_at(at(9, 0, 0), 1.0).unwrap().unwrap();
        let second = recorder.record_at(at(9, 0, 0), 2.0).unwrap().unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(second.artifact, "power_19_10_2026_9_0_0_1.json");
        assert_eq!(read_batch(&second.path).len(), 1);
    }

    #[test]
    fn failed_flush_keeps_batch_for_next_attempt() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("records");
        fs::write(&blocked, b"not a directory").unwrap();

        let mut recorder = BatchRecorder::new("power", &blocked, 2).unwrap();
        recorder.record(1.0).unwrap();
        assert!(recorder.record(2.0).is_err());
        assert_eq!(recorder.len(), 2);

        fs::remove_file(&blocked).unwrap();
        let report = recorder.record(3.0).unwrap().unwrap();

        assert_eq!(report.entries, 3);
        assert!(recorder.is_empty());
        assert_eq!(read_batch(&report.path).len(), 3);
    }

    #[test]
    fn interrupted_write_leaves_no_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("power_19_10_2026_9_0_0.json");

        let result = write_artifact(&path, |file| {
            file.write_all(b"[{\"timestamp\":")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });

        assert!(matches!(result, Err(InsightError::Io(_))));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn retry_after_failed_flush_writes_single_artifact() {
        let dir = tempdir().unwrap();
        let mut recorder = BatchRecorder::new("power", dir.path(), 2).unwrap();
        recorder.record_at(at(9, 0, 0), 1.0).unwrap();

        // A directory squatting on the staging name makes the open fail
        let staging = staging_path(&dir.path().join("power_19_10_2026_9_0_1.json"));
        fs::create_dir(&staging).unwrap();
        assert!(recorder.record_at(at(9, 0, 1), 2.0).is_err());
        fs::remove_dir(&staging).unwrap();

        let report = recorder.record_at(at(9, 0, 2), 3.0).unwrap().unwrap();
        assert_eq!(report.artifact, "power_19_10_2026_9_0_2.json");

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["power_19_10_2026_9_0_2.json".to_string()]);
        assert_eq!(read_batch(&report.path).len(), 3);
    }

    #[test]
    fn zero_max_size_is_rejected() {
        assert!(matches!(
            BatchRecorder::new("power", "records", 0),
            Err(InsightError::InvalidConfig(_))
        ));
    }
}
