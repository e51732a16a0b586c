//! JSON-lines dataset file

use super::traits::{OutputResult, OutputSink};
use crate::crawler::{lock, Record};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Appends one JSON object per record to a file
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it and its parent directories
    ///
    /// With `truncate` set the file is emptied first (fresh runs).
    pub fn open(path: &Path, truncate: bool) -> OutputResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = if truncate {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?
        } else {
            OpenOptions::new().create(true).append(true).open(path)?
        };

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl OutputSink for JsonLinesSink {
    fn emit(&self, record: &Record) -> OutputResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = lock(&self.writer);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> OutputResult<()> {
        lock(&self.writer).flush()?;
        Ok(())
    }
}
