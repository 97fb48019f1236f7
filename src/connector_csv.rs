//! CSV snapshot connector.
//!
//! Reads a CSV export with a header row and yields one [`Record`] per data
//! row. Header names are trimmed and lower-cased; values lose leading
//! whitespace. Any read error (I/O, ragged row, bad UTF-8) is reported as
//! [`SyncError::SourceRead`] and ends the iteration.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bulksync_core::{Record, SyncError};

/// Iterator over the records of a CSV file.
pub struct CsvSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    row: csv::StringRecord,
    finished: bool,
}

impl CsvSource<File> {
    /// Open a CSV file.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let file = File::open(path)
            .map_err(|e| SyncError::SourceRead(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }
}

impl<R: Read> CsvSource<R> {
    pub fn from_reader(rdr: R) -> Result<Self, SyncError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(rdr);
        let headers = reader
            .headers()
            .map_err(|e| SyncError::SourceRead(format!("header row: {}", e)))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        Ok(Self {
            reader,
            headers,
            row: csv::StringRecord::new(),
            finished: false,
        })
    }

    /// Normalized header names, in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl<R: Read> Iterator for CsvSource<R> {
    type Item = Result<Record, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(Ok(self
                .headers
                .iter()
                .zip(self.row.iter())
                .map(|(name, value)| (name.clone(), value.trim_start().to_string()))
                .collect())),
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(SyncError::SourceRead(e.to_string())))
            }
        }
    }
}
