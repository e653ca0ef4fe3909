//! Run tracking: parameters, metrics, predictions and errors.
//!
//! Components receive an `Arc<dyn Tracker>`; the concrete sink is chosen
//! from [`TrackingConfig`].

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::config::TrackingConfig;
use crate::error::{Error, Result};

pub trait Tracker: Send + Sync {
    fn log_params(&self, stage: &str, params: Map<String, Value>);
    fn log_metrics(&self, stage: &str, metrics: &[(&str, f64)]);
    fn log_prediction(&self, image_path: &Path, prediction: &Value);
    fn log_error(&self, error_type: &str, message: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn log_params(&self, _stage: &str, _params: Map<String, Value>) {}
    fn log_metrics(&self, _stage: &str, _metrics: &[(&str, f64)]) {}
    fn log_prediction(&self, _image_path: &Path, _prediction: &Value) {}
    fn log_error(&self, _error_type: &str, _message: &str) {}
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonLinesTracker {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesTracker {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn write_event(&self, event: &str, mut body: Map<String, Value>) {
        body.insert("event".into(), event.into());
        body.insert("timestamp".into(), chrono::Utc::now().to_rfc3339().into());
        let line = Value::Object(body).to_string();
        // A poisoned lock only means another writer panicked mid-line.
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{line}") {
            log::warn!("Failed to write tracking event to {}: {e}", self.path.display());
        }
    }
}

impl Tracker for JsonLinesTracker {
    fn log_params(&self, stage: &str, params: Map<String, Value>) {
        let mut body = Map::new();
        body.insert("stage".into(), stage.into());
        body.insert("params".into(), Value::Object(params));
        self.write_event("params", body);
    }

    fn log_metrics(&self, stage: &str, metrics: &[(&str, f64)]) {
        let values: Map<String, Value> = metrics
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        let mut body = Map::new();
        body.insert("stage".into(), stage.into());
        body.insert("metrics".into(), Value::Object(values));
        self.write_event("metrics", body);
    }

    fn log_prediction(&self, image_path: &Path, prediction: &Value) {
        let mut body = Map::new();
        body.insert("image_path".into(), image_path.display().to_string().into());
        body.insert(
            "image_hash".into(),
            file_sha256(image_path).map_or(Value::Null, Value::String),
        );
        body.insert("prediction".into(), prediction.clone());
        self.write_event("prediction", body);
    }

    fn log_error(&self, error_type: &str, message: &str) {
        let mut body = Map::new();
        body.insert("error_type".into(), error_type.into());
        body.insert("message".into(), message.into());
        self.write_event("error", body);
    }
}

/// Hex SHA-256 of a file, `None` if it cannot be read.
pub fn file_sha256(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// Build the tracker selected by configuration.
pub fn from_config(config: &TrackingConfig) -> Result<Arc<dyn Tracker>> {
    Ok(match config {
        TrackingConfig::Noop => Arc::new(NoopTracker),
        TrackingConfig::JsonLines { path } => Arc::new(JsonLinesTracker::open(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_tracker_appends_events() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("runs.jsonl");
        let image_path = dir.path().join("img.bin");
        std::fs::write(&image_path, b"abc").unwrap();

        let tracker = from_config(&TrackingConfig::JsonLines { path: log_path.clone() }).unwrap();
        tracker.log_metrics("analyze", &[("n_rows", 12.0)]);
        tracker.log_prediction(&image_path, &json!({"reliability_score": 80.0}));
        tracker.log_error("processing_error", "boom");

        let text = std::fs::read_to_string(&log_path).unwrap();
        let events: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["metrics"]["n_rows"], json!(12.0));
        assert_eq!(
            events[1]["image_hash"],
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(events[2]["event"], json!("error"));
    }

    #[test]
    fn test_missing_file_has_no_hash() {
        assert_eq!(file_sha256(Path::new("/nonexistent/file")), None);
    }
}
