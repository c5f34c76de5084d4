//! Writes export documents to a local file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info, warn};

use orbitscope_batch::{ExportDocument, ExportError, ExportOutcome, ExportSink, TabularExport};

/// Writes to one destination path.
///
/// JSON and visual documents are written as pretty-printed JSON; tabular
/// documents as CSV. An existing file is only replaced when `overwrite` is
/// set, otherwise the write reports [`ExportOutcome::Cancelled`].
#[derive(Debug, Clone)]
pub struct FileExportSink {
    path: PathBuf,
    overwrite: bool,
}

impl FileExportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overwrite: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ExportSink for FileExportSink {
    async fn write(&self, document: &ExportDocument) -> Result<ExportOutcome, ExportError> {
        if !self.overwrite && tokio::fs::try_exists(&self.path).await? {
            warn!(path = %self.path.display(), "export destination exists; not overwriting");
            return Ok(ExportOutcome::Cancelled);
        }

        let body = render(document)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(&self.path, &body).await {
            error!(path = %self.path.display(), error = %e, "failed to write export");
            return Err(e.into());
        }

        info!(
            path = %self.path.display(),
            format = %document.format(),
            batch_id = %document.metadata().batch_id,
            bytes = body.len(),
            "export written"
        );
        Ok(ExportOutcome::Written {
            destination: self.path.display().to_string(),
            bytes: body.len() as u64,
        })
    }
}

/// Serialize a document the way [`FileExportSink`] stores it.
pub fn render(document: &ExportDocument) -> Result<Vec<u8>, ExportError> {
    match document {
        ExportDocument::Json(export) => Ok(serde_json::to_vec_pretty(export)?),
        ExportDocument::Csv(table) => Ok(to_csv(table).into_bytes()),
        ExportDocument::Visual(export) => Ok(serde_json::to_vec_pretty(export)?),
    }
}

/// RFC 4180 CSV: header row, then one line per row, CRLF line endings.
pub fn to_csv(table: &TabularExport) -> String {
    let mut out = String::new();
    push_record(&mut out, table.columns.iter());
    for row in &table.rows {
        push_record(&mut out, row.iter());
    }
    out
}

fn push_record<'a>(out: &mut String, cells: impl Iterator<Item = &'a String>) {
    let line: Vec<String> = cells.map(|c| csv_escape(c)).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
