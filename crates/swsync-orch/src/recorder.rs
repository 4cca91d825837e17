//! Append-only audit recording of consumed deltas.

use chrono::Utc;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use swsync_bus::KeyOpFieldsValues;

/// Writes one line per consumed delta:
/// `<timestamp>|<table>:<key>|<op>|<f1>:<v1>|…`
///
/// A failed write is logged and dropped; recording must never stall the
/// dispatch path.
pub struct Recorder {
    file: Mutex<File>,
}

impl Recorder {
    /// Opens (appending) `<dir>/<daemon>.rec`.
    pub fn open(dir: &Path, daemon: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{}.rec", daemon));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, table: &str, delta: &KeyOpFieldsValues) {
        let mut line = format!(
            "{}|{}:{}|{}",
            Utc::now().format("%Y-%m-%d.%H:%M:%S%.6f"),
            table,
            delta.key,
            delta.op.as_str()
        );
        for (field, value) in &delta.fvs {
            line.push('|');
            line.push_str(field);
            line.push(':');
            line.push_str(value);
        }
        line.push('\n');

        let mut file = self.file.lock().unwrap();
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!("audit record dropped: {}", e);
        }
    }
}
