//! CSV export of a session's detection history.

use crate::core::history::History;
use std::path::{Path, PathBuf};

/// Column header of every export.
pub const CSV_HEADER: &str = "id,timestamp,risk_level,confidence,position_x,position_y,session_id";

/// A rendered export, ready to be written or offered for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDocument {
    /// Suggested file name, derived from the session id
    pub file_name: String,
    /// Header line followed by one line per record
    pub content: String,
    /// Number of data rows
    pub rows: usize,
}

impl CsvDocument {
    /// Write the document into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(dir).map_err(|e| ExportError::Io(e.to_string()))?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.content).map_err(|e| ExportError::Io(e.to_string()))?;
        Ok(path)
    }
}

/// Export errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The session has no records. A notice for the user, not a fault.
    Empty,
    Io(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Empty => write!(f, "No data to export: start a detection session first"),
            ExportError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for ExportError {}

/// File name used for a session's export.
pub fn export_file_name(session_id: &str) -> String {
    format!("pedestrian-data-{session_id}.csv")
}

/// Render `history` as CSV, newest record first.
///
/// Output depends only on the record set, so exporting twice without an
/// intervening merge yields identical bytes.
pub fn export_csv(history: &History, session_id: &str) -> Result<CsvDocument, ExportError> {
    if history.is_empty() {
        return Err(ExportError::Empty);
    }

    let rows: Vec<String> = history
        .sorted()
        .into_iter()
        .map(|r| {
            format!(
                "{},{},{},{},{},{},{}",
                r.id, r.timestamp, r.risk_level, r.confidence, r.position_x, r.position_y, r.session_id
            )
        })
        .collect();

    Ok(CsvDocument {
        file_name: export_file_name(session_id),
        content: format!("{CSV_HEADER}\n{}", rows.join("\n")),
        rows: rows.len(),
    })
}
