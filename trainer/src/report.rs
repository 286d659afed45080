//! Append-only batch progress report, written by the coordinator rank only.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
};

/// CSV progress file: one row per (epoch, batch).
///
/// Single-writer by policy — only the coordinator rank constructs one, so
/// resumed runs append to the existing file without interleaving.
#[derive(Debug)]
pub struct ProgressReport {
    file: File,
}

impl ProgressReport {
    /// Opens the report for appending, writing the header when the file is
    /// fresh.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut report = Self { file };
        if report.file.metadata()?.len() == 0 {
            writeln!(report.file, "epoch, batch, trials, correct")?;
        }
        Ok(report)
    }

    pub fn append(
        &mut self,
        epoch: usize,
        batch: usize,
        trials: usize,
        correct: usize,
    ) -> io::Result<()> {
        writeln!(self.file, "{epoch}, {batch}, {trials}, {correct}")?;
        self.file.flush()
    }
}
