//! The process log: a plain-text, append-only record of every decision the
//! clip extractor makes, kept for later audit.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;

use crate::error::Result;

pub struct ProcessLog {
    writer: Option<LineWriter<File>>,
    lines: Vec<String>,
}

impl ProcessLog {
    /// Append to the log file at `path`, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Some(LineWriter::new(file)),
            lines: Vec::new(),
        })
    }

    /// A log that is only kept in memory.
    pub fn in_memory() -> Self {
        Self {
            writer: None,
            lines: Vec::new(),
        }
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "exhibit::process", "{}", message);

        if let Some(writer) = self.writer.as_mut()
            && let Err(e) = writeln!(writer, "{}", message)
        {
            tracing::warn!("Failed to write process log: {}", e);
        }
        self.lines.push(message);
    }

    /// Everything recorded through this handle.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_across_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("processing.log");

        let mut first = ProcessLog::open(&path).unwrap();
        first.record("Skipping Run: run_a");
        drop(first);

        let mut second = ProcessLog::open(&path).unwrap();
        second.record(">>> Processing Run: run_b");
        assert_eq!(second.lines(), [">>> Processing Run: run_b"]);
        drop(second);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Skipping Run: run_a\n>>> Processing Run: run_b\n");
    }
}
