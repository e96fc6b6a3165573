//! Metrics records and sinks
//!
//! The training core only produces flat `name -> scalar` records; where
//! they end up (memory, a JSON-lines file, nowhere) is decided by the
//! `MetricsSink` handed to the trainer.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Ordered mapping of metric names (e.g. `train/sup_loss`) to scalar values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsRecord {
    values: BTreeMap<String, f64>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Merge another record into this one, overwriting duplicate keys
    pub fn extend(&mut self, other: MetricsRecord) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for MetricsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{}': {:.4}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// Receiver of metric records, one call per logged step or evaluation
pub trait MetricsSink {
    fn record(&mut self, iteration: usize, record: &MetricsRecord);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&mut self, _iteration: usize, _record: &MetricsRecord) {}
}

/// Keeps every record in memory; handy for tests and notebooks
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<(usize, MetricsRecord)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that carry the given key
    pub fn with_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a (usize, MetricsRecord)> {
        self.records.iter().filter(move |(_, r)| r.get(key).is_some())
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, iteration: usize, record: &MetricsRecord) {
        self.records.push((iteration, record.clone()));
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn record(&mut self, iteration: usize, record: &MetricsRecord) {
        (**self).record(iteration, record)
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    iteration: usize,
    timestamp: String,
    #[serde(flatten)]
    metrics: &'a MetricsRecord,
}

/// Appends one JSON object per record to a file
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonLinesSink {
    fn record(&mut self, iteration: usize, record: &MetricsRecord) {
        let line = JsonLine {
            iteration,
            timestamp: chrono::Local::now().to_rfc3339(),
            metrics: record,
        };

        // A broken metrics file must not stop training.
        let result = serde_json::to_string(&line)
            .map_err(std::io::Error::other)
            .and_then(|json| writeln!(self.writer, "{}", json))
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            warn!("Failed to write metrics for iteration {}: {}", iteration, e);
        }
    }
}

/// Fraction `correct / total`, 0.0 for an empty set
pub fn ratio(correct: usize, total: usize) -> f64 {
    if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_display_is_ordered() {
        let mut record = MetricsRecord::new();
        record.insert("train/total_loss", 1.5);
        record.insert("lr", 0.03);

        assert_eq!(format!("{}", record), "{'lr': 0.0300, 'train/total_loss': 1.5000}");
    }

    #[test]
    fn test_extend_overwrites() {
        let mut a = MetricsRecord::new();
        a.insert("eval/loss", 2.0);
        let mut b = MetricsRecord::new();
        b.insert("eval/loss", 1.0);
        b.insert("eval/top-1-acc", 0.5);

        a.extend(b);
        assert_eq!(a.get("eval/loss"), Some(1.0));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_memory_sink_filters_by_key() {
        let mut sink = MemorySink::new();
        let mut train = MetricsRecord::new();
        train.insert("train/sup_loss", 0.7);
        let mut eval = train.clone();
        eval.insert("eval/top-1-acc", 0.25);

        sink.record(0, &eval);
        sink.record(1, &train);

        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.with_key("eval/top-1-acc").count(), 1);
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics").join("train.jsonl");

        let mut sink = JsonLinesSink::create(&path).unwrap();
        let mut record = MetricsRecord::new();
        record.insert("train/total_loss", 0.5);
        sink.record(3, &record);
        sink.record(4, &record);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["iteration"], 3);
        assert_eq!(parsed["train/total_loss"], 0.5);
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(3, 4), 0.75);
    }
}
