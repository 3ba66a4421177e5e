use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use log::debug;

use super::summary::ScenarioRecord;
use crate::error::Result;

/// Append-only CSV log of scenario records
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first when the file is new
    pub fn append(&self, record: &ScenarioRecord) -> Result<()> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        if is_new {
            writer.write_record(ScenarioRecord::columns())?;
        }
        writer.write_record(record.row())?;
        writer.flush()?;

        debug!("appended result row to {}", self.path.display());
        Ok(())
    }

    /// All data rows as strings, header excluded
    pub fn load(&self) -> Result<Vec<Vec<String>>> {
        let file = File::open(&self.path)?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    pub fn header(&self) -> Result<Vec<String>> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(&self.path)?;
        Ok(reader.headers()?.iter().map(str::to_string).collect())
    }
}
