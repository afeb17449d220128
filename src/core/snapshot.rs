//! Metrics records and the on-disk snapshot history
//!
//! Each snapshot is a JSON file named after its timestamp
//! (`YYYY-MM-DD-HH:MM:SS.json`). The store indexes the directory once when
//! opened and keeps the index ordered by timestamp.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{MeterError, Result};

/// Format of the `time` field inside a record
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of a snapshot's file stem
pub const FILE_TIME_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Leading CSV columns, in order; any other keys follow alphabetically
const LEADING_COLUMNS: [&str; 5] = ["word_count", "page_count", "references", "figures", "tables"];

/// One measurement of the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub time: String,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub page_count: u64,
    #[serde(default)]
    pub references: u64,
    #[serde(default)]
    pub figures: u64,
    #[serde(default)]
    pub tables: u64,
    /// Raw command tallies and any other named counts
    #[serde(flatten)]
    pub extra: BTreeMap<String, u64>,
}

impl MetricsRecord {
    /// Build a record from the folded counts. The well-known names are lifted
    /// into their own fields; everything else is kept as-is.
    pub fn new(
        timestamp: NaiveDateTime,
        word_count: u64,
        page_count: u64,
        mut counts: BTreeMap<String, u64>,
    ) -> Self {
        let mut take = |name: &str| counts.remove(name).unwrap_or(0);
        let references = take("references");
        let figures = take("figures");
        let tables = take("tables");

        for reserved in ["time", "word_count", "page_count"] {
            if counts.remove(reserved).is_some() {
                warn!("Dropping count that shadows record field `{}`", reserved);
            }
        }

        Self {
            time: timestamp.format(TIME_FORMAT).to_string(),
            word_count,
            page_count,
            references,
            figures,
            tables,
            extra: counts,
        }
    }

    pub fn timestamp(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.time, TIME_FORMAT)
            .map_err(|e| MeterError::Snapshot(format!("invalid record time `{}`: {}", self.time, e)))
    }

    /// File name this record is persisted under
    pub fn file_name(&self) -> Result<String> {
        Ok(format!("{}.json", self.timestamp()?.format(FILE_TIME_FORMAT)))
    }
}

/// Append-only, timestamp-ordered collection of snapshots in one directory
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    entries: BTreeMap<NaiveDateTime, PathBuf>,
}

impl SnapshotStore {
    /// Open (creating if needed) the history directory and index its snapshots
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut entries = BTreeMap::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| MeterError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match NaiveDateTime::parse_from_str(stem, FILE_TIME_FORMAT) {
                Ok(timestamp) => {
                    entries.insert(timestamp, path);
                }
                Err(_) => warn!("Ignoring {} (name is not a timestamp)", path.display()),
            }
        }

        debug!("Indexed {} snapshot(s) in {}", entries.len(), dir.display());
        Ok(Self { dir, entries })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Path of the most recent snapshot
    pub fn latest(&self) -> Option<&Path> {
        self.entries.values().next_back().map(PathBuf::as_path)
    }

    /// Raw fields of the most recent snapshot
    pub fn load_latest(&self) -> Result<Option<Map<String, Value>>> {
        self.latest().map(load_object).transpose()
    }

    /// Raw fields of every snapshot, oldest first
    pub fn load_all(&self) -> Result<Vec<Map<String, Value>>> {
        self.entries.values().map(|p| load_object(p)).collect()
    }

    /// Write a new snapshot. The file appears atomically; an existing
    /// snapshot is never overwritten.
    pub fn persist(&mut self, record: &MetricsRecord) -> Result<PathBuf> {
        let timestamp = record.timestamp()?;
        let path = self.dir.join(record.file_name()?);
        if path.exists() {
            return Err(MeterError::Snapshot(format!(
                "snapshot {} already exists",
                path.display()
            )));
        }

        let content = serde_json::to_string_pretty(record)?;
        write_atomic(&path, content.as_bytes())?;
        info!("Recorded snapshot {}", path.display());

        self.entries.insert(timestamp, path.clone());
        Ok(path)
    }

    /// Write every snapshot as one CSV row, ordered by date. Missing values
    /// are written as zero. Returns the number of rows.
    pub fn export_csv<P: AsRef<Path>>(&self, output: P) -> Result<usize> {
        let records = self.load_all()?;

        let mut others = BTreeSet::new();
        for record in &records {
            for key in record.keys() {
                if key != "time" && !LEADING_COLUMNS.contains(&key.as_str()) {
                    others.insert(key.clone());
                }
            }
        }
        let columns: Vec<String> = LEADING_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(others)
            .collect();

        let mut csv = String::new();
        let header: Vec<String> = std::iter::once("date".to_string())
            .chain(columns.iter().cloned())
            .map(|c| csv_field(&c))
            .collect();
        csv.push_str(&header.join(","));
        csv.push('\n');

        for record in &records {
            let date = record.get("time").and_then(Value::as_str).unwrap_or_default();
            let mut row = vec![csv_field(date)];
            for column in &columns {
                row.push(csv_value(record.get(column)));
            }
            csv.push_str(&row.join(","));
            csv.push('\n');
        }

        write_atomic(output.as_ref(), csv.as_bytes())?;
        info!("Wrote {} row(s) to {}", records.len(), output.as_ref().display());
        Ok(records.len())
    }
}

fn load_object(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => Err(MeterError::Snapshot(format!(
            "{} does not contain a JSON object",
            path.display()
        ))),
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MeterError::Snapshot(format!("invalid output path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn csv_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "0".to_string(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() => (f as i64).to_string(),
            _ => n.to_string(),
        },
        Some(Value::String(s)) => csv_field(s),
        Some(other) => csv_field(&other.to_string()),
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 2, 3)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn record(time: NaiveDateTime, words: u64, pages: u64) -> MetricsRecord {
        let mut counts = BTreeMap::new();
        counts.insert("references".to_string(), 4);
        counts.insert("\\includegraphics[".to_string(), 2);
        MetricsRecord::new(time, words, pages, counts)
    }

    #[test]
    fn test_record_serializes_flat() {
        let rec = record(at(18, 36, 22), 100, 10);
        let value = serde_json::to_value(&rec).unwrap();

        assert_eq!(value["time"], "2023-02-03 18:36:22");
        assert_eq!(value["references"], 4);
        assert_eq!(value["figures"], 0);
        assert_eq!(value["\\includegraphics["], 2);
        assert_eq!(rec.file_name().unwrap(), "2023-02-03-18:36:22.json");
    }

    #[test]
    fn test_latest_is_by_timestamp_not_name_order() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.latest().is_none());

        store.persist(&record(at(9, 0, 0), 1, 1)).unwrap();
        store.persist(&record(at(18, 0, 0), 2, 2)).unwrap();
        store.persist(&record(at(10, 0, 0), 3, 3)).unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("2023-02-03-23:00:00.json")).unwrap();

        let reopened = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 3);
        let latest = reopened.load_latest().unwrap().unwrap();
        assert_eq!(latest["word_count"], 2);
    }

    #[test]
    fn test_persist_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        store.persist(&record(at(9, 0, 0), 1, 1)).unwrap();

        let err = store.persist(&record(at(9, 0, 0), 5, 5)).unwrap_err();
        assert!(matches!(err, MeterError::Snapshot(_)));
    }

    #[test]
    fn test_csv_is_sorted_and_zero_filled() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        store.persist(&record(at(12, 0, 0), 200, 20)).unwrap();
        std::fs::write(
            dir.path().join("2023-02-03-08:00:00.json"),
            r#"{"time": "2023-02-03 08:00:00", "word_count": 50, "page_count": 5}"#,
        )
        .unwrap();

        let store = SnapshotStore::open(dir.path()).unwrap();
        let out = dir.path().join("thesis_data.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 2);

        let csv = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "date,word_count,page_count,references,figures,tables,\\includegraphics["
        );
        assert_eq!(lines[1], "2023-02-03 08:00:00,50,5,0,0,0,0");
        assert_eq!(lines[2], "2023-02-03 12:00:00,200,20,4,0,0,2");
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
