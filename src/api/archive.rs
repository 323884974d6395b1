//! Durable store for finished sessions.
//!
//! The archive is append-only: one JSON object per line, each carrying a
//! `timestamp` key so the file can be grepped or loaded into a spreadsheet.
use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    sync::Arc,
};

use super::session::TestSession;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Destination for finalized sessions.
pub trait SessionArchive: Send {
    fn store(&mut self, session: &TestSession) -> Result<()>;
}

/// Appends sessions to a JSON Lines file.
#[derive(Debug, Clone)]
pub struct JsonlArchive {
    path: PathBuf,
}

impl JsonlArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every record in the file, oldest first.
    pub fn load(&self) -> Result<Vec<serde_json::Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open archive {}", self.path.display()))?;
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).with_context(|| {
                format!("Corrupt record on line {} of {}", index + 1, self.path.display())
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl SessionArchive for JsonlArchive {
    fn store(&mut self, session: &TestSession) -> Result<()> {
        let mut record = serde_json::to_value(session)?;
        if let Some(object) = record.as_object_mut() {
            object.insert(
                "timestamp".into(),
                Local::now().format(TIMESTAMP_FORMAT).to_string().into(),
            );
        }

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open archive {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;

        log::info!(
            "Archived session {} to {}",
            session.id,
            self.path.display()
        );
        Ok(())
    }
}

/// Discards everything.
pub struct NoOpArchive;

impl SessionArchive for NoOpArchive {
    fn store(&mut self, _session: &TestSession) -> Result<()> {
        Ok(())
    }
}

/// Keeps sessions in memory; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    sessions: Arc<Mutex<Vec<TestSession>>>,
}

impl MemoryArchive {
    pub fn sessions(&self) -> Vec<TestSession> {
        self.sessions.lock().clone()
    }
}

impl SessionArchive for MemoryArchive {
    fn store(&mut self, session: &TestSession) -> Result<()> {
        self.sessions.lock().push(session.clone());
        Ok(())
    }
}
