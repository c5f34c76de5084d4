//! Export aggregation.
//!
//! Shapes the records of one batch into serializable documents. Writing them
//! anywhere is the job of an [`ExportSink`]; turning artifact references into
//! embeddable values is the job of an [`ArtifactEncoder`].
//!
//! An aggregator works on a copy of the records taken when it is built, so a
//! retry that lands afterwards never changes an export already produced.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbitscope_ai::{ArtifactKind, ArtifactRef, Prediction};
use orbitscope_core::{BatchId, JobId};

use crate::error::ExportError;
use crate::jobs::{JobRecord, JobSet, JobStatus};

/// Header shared by every export shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: BatchId,
    pub exported_at: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs without an outcome (never dispatched or still running).
    pub pending: usize,
}

/// One completed job with its full payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExport {
    pub identifier: JobId,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub prediction: Prediction,
}

/// Nested export: metadata plus every completed job's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchExport {
    pub metadata: BatchMetadata,
    pub jobs: Vec<JobExport>,
}

/// Flat export: one row per finished job, cells aligned with `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularExport {
    pub metadata: BatchMetadata,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Artifact after encoding, ready to embed next to a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedArtifact {
    pub category: String,
    pub kind: ArtifactKind,
    /// `file:///` URL of the artifact.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualRow {
    pub cells: Vec<String>,
    pub artifacts: Vec<EncodedArtifact>,
}

/// Tabular export with each row's visual artifacts embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualExport {
    pub metadata: BatchMetadata,
    pub columns: Vec<String>,
    pub rows: Vec<VisualRow>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// [`BatchExport`]
    Json,
    /// [`TabularExport`]
    Csv,
    /// [`VisualExport`]
    Visual,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Visual => "visual",
        }
    }
}

impl core::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "visual" => Ok(ExportFormat::Visual),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Any of the aggregator's output shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ExportDocument {
    Json(BatchExport),
    Csv(TabularExport),
    Visual(VisualExport),
}

impl ExportDocument {
    pub fn format(&self) -> ExportFormat {
        match self {
            ExportDocument::Json(_) => ExportFormat::Json,
            ExportDocument::Csv(_) => ExportFormat::Csv,
            ExportDocument::Visual(_) => ExportFormat::Visual,
        }
    }

    pub fn metadata(&self) -> &BatchMetadata {
        match self {
            ExportDocument::Json(e) => &e.metadata,
            ExportDocument::Csv(e) => &e.metadata,
            ExportDocument::Visual(e) => &e.metadata,
        }
    }
}

/// What a sink did with a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportOutcome {
    Written { destination: String, bytes: u64 },
    /// The operator (or the sink's overwrite policy) declined the write.
    Cancelled,
}

/// Destination for finished exports.
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn write(&self, document: &ExportDocument) -> Result<ExportOutcome, ExportError>;
}

/// Turns an artifact reference into something embeddable in a visual export.
pub trait ArtifactEncoder: Send + Sync {
    fn encode(&self, artifact: &ArtifactRef) -> Result<EncodedArtifact, ExportError>;
}

/// Encoder that only normalises the path into a `file:///` URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlArtifactEncoder;

impl ArtifactEncoder for UrlArtifactEncoder {
    fn encode(&self, artifact: &ArtifactRef) -> Result<EncodedArtifact, ExportError> {
        if artifact.path.trim().is_empty() {
            return Err(ExportError::Artifact {
                path: artifact.path.clone(),
                reason: "empty path".to_string(),
            });
        }
        Ok(EncodedArtifact {
            category: artifact.category.clone(),
            kind: artifact.kind,
            url: file_url(&artifact.path),
            bytes: None,
            sha256: None,
        })
    }
}

/// Normalise a local path (Windows or POSIX) into a `file:///` URL.
/// Values that already carry a scheme are returned unchanged.
pub fn file_url(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let normalized = path.replace('\\', "/");
    format!("file:///{}", normalized.trim_start_matches('/'))
}

/// Percent with one decimal, e.g. `0.875` -> `87.5%`.
pub fn percent(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

const LEADING_COLUMNS: [&str; 3] = ["identifier", "status", "final_label"];
const TRAILING_COLUMNS: [&str; 2] = ["error_kind", "error"];

/// A result-derived column: a category's prediction when `class` is `None`,
/// otherwise one class probability. Orders by category, prediction first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ResultColumn {
    category: String,
    class: Option<String>,
}

impl ResultColumn {
    fn header(&self) -> String {
        match &self.class {
            None => format!("{}.prediction", self.category),
            Some(class) => format!("{}.{class}", self.category),
        }
    }

    fn cell(&self, prediction: &Prediction) -> String {
        let Some(result) = prediction.results.get(&self.category) else {
            return String::new();
        };
        match &self.class {
            None => result.prediction.clone(),
            Some(class) => result.probabilities.get(class).map(|&p| percent(p)).unwrap_or_default(),
        }
    }
}

/// Builds export documents from one batch's records.
#[derive(Debug, Clone)]
pub struct ExportAggregator {
    batch_id: BatchId,
    records: Vec<JobRecord>,
}

impl ExportAggregator {
    pub fn new(batch_id: BatchId, records: Vec<JobRecord>) -> Self {
        Self { batch_id, records }
    }

    /// Snapshot the records of a job set.
    pub fn from_jobs(jobs: &JobSet) -> Self {
        let table = jobs.lock();
        Self::new(table.batch_id(), table.records().to_vec())
    }

    pub fn metadata(&self) -> BatchMetadata {
        let count = |status: JobStatus| self.records.iter().filter(|r| r.status() == status).count();
        let completed = count(JobStatus::Completed);
        let failed = count(JobStatus::Failed);
        BatchMetadata {
            batch_id: self.batch_id,
            exported_at: Utc::now(),
            total: self.records.len(),
            completed,
            failed,
            pending: self.records.len() - completed - failed,
        }
    }

    pub fn export(
        &self,
        format: ExportFormat,
        encoder: &dyn ArtifactEncoder,
    ) -> Result<ExportDocument, ExportError> {
        Ok(match format {
            ExportFormat::Json => ExportDocument::Json(self.nested()),
            ExportFormat::Csv => ExportDocument::Csv(self.tabular()),
            ExportFormat::Visual => ExportDocument::Visual(self.visual(encoder)?),
        })
    }

    /// Every completed job with its full payload, in submission order.
    pub fn nested(&self) -> BatchExport {
        let jobs = self
            .records
            .iter()
            .filter_map(|r| {
                r.result().map(|p| JobExport {
                    identifier: r.identifier().clone(),
                    attempts: r.attempts(),
                    duration_ms: r.duration_ms(),
                    prediction: p.clone(),
                })
            })
            .collect();

        BatchExport {
            metadata: self.metadata(),
            jobs,
        }
    }

    /// One row per completed or failed job.
    ///
    /// A completed row fills the result columns and leaves the error columns
    /// empty; a failed row does the opposite.
    pub fn tabular(&self) -> TabularExport {
        let result_columns = self.result_columns();
        let columns = LEADING_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(result_columns.iter().map(ResultColumn::header))
            .chain(TRAILING_COLUMNS.iter().map(|c| c.to_string()))
            .collect();

        let rows = self
            .finished()
            .map(|r| Self::row(r, &result_columns))
            .collect();

        TabularExport {
            metadata: self.metadata(),
            columns,
            rows,
        }
    }

    /// [`tabular`](Self::tabular) with each completed row's artifacts
    /// passed through `encoder`. The first encoder error aborts the export.
    pub fn visual(&self, encoder: &dyn ArtifactEncoder) -> Result<VisualExport, ExportError> {
        let TabularExport {
            metadata,
            columns,
            rows,
        } = self.tabular();

        let rows = self
            .finished()
            .zip(rows)
            .map(|(record, cells)| {
                let artifacts = record
                    .result()
                    .map(Prediction::artifacts)
                    .unwrap_or_default()
                    .iter()
                    .map(|a| encoder.encode(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(VisualRow { cells, artifacts })
            })
            .collect::<Result<Vec<_>, ExportError>>()?;

        Ok(VisualExport {
            metadata,
            columns,
            rows,
        })
    }

    fn finished(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.iter().filter(|r| r.status().is_terminal())
    }

    /// Union of result columns over completed jobs, sorted.
    fn result_columns(&self) -> Vec<ResultColumn> {
        let mut columns = BTreeSet::new();
        for prediction in self.records.iter().filter_map(JobRecord::result) {
            for (category, result) in &prediction.results {
                columns.insert(ResultColumn {
                    category: category.clone(),
                    class: None,
                });
                for class in result.probabilities.keys() {
                    columns.insert(ResultColumn {
                        category: category.clone(),
                        class: Some(class.clone()),
                    });
                }
            }
        }
        columns.into_iter().collect()
    }

    fn row(record: &JobRecord, result_columns: &[ResultColumn]) -> Vec<String> {
        let mut row = vec![
            record.identifier().to_string(),
            record.status().to_string(),
        ];

        match (record.result(), record.failure()) {
            (Some(prediction), _) => {
                row.push(prediction.final_label.clone());
                row.extend(result_columns.iter().map(|c| c.cell(prediction)));
                row.extend([String::new(), String::new()]);
            }
            (None, failure) => {
                row.push(String::new());
                row.extend(result_columns.iter().map(|_| String::new()));
                row.push(failure.map(|f| f.kind.to_string()).unwrap_or_default());
                row.push(failure.map(|f| f.message.clone()).unwrap_or_default());
            }
        }
        row
    }
}
