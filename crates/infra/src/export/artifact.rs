//! Artifact encoder that reads the referenced files from disk.

use sha2::{Digest, Sha256};

use orbitscope_ai::ArtifactRef;
use orbitscope_batch::export::file_url;
use orbitscope_batch::{
    ArtifactEncoder, EncodedArtifact, ExportAggregator, ExportDocument, ExportError, ExportFormat,
    JobSet,
};

/// SHA-256 hex digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Resolves every artifact to a `file:///` URL plus the size and digest of
/// the file it points to. A missing or unreadable file fails the export.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileArtifactEncoder;

impl ArtifactEncoder for FileArtifactEncoder {
    fn encode(&self, artifact: &ArtifactRef) -> Result<EncodedArtifact, ExportError> {
        let data = std::fs::read(&artifact.path).map_err(|e| ExportError::Artifact {
            path: artifact.path.clone(),
            reason: e.to_string(),
        })?;

        Ok(EncodedArtifact {
            category: artifact.category.clone(),
            kind: artifact.kind,
            url: file_url(&artifact.path),
            bytes: Some(data.len() as u64),
            sha256: Some(sha256_hex(&data)),
        })
    }
}

/// Snapshot `jobs` and build the export on the blocking pool.
///
/// Visual exports read every artifact file, which must not stall the async
/// workers.
pub async fn build_export(jobs: &JobSet, format: ExportFormat) -> Result<ExportDocument, ExportError> {
    let aggregator = ExportAggregator::from_jobs(jobs);
    tokio::task::spawn_blocking(move || aggregator.export(format, &FileArtifactEncoder))
        .await
        .map_err(std::io::Error::from)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use orbitscope_ai::fake::FakeInferenceClient;
    use orbitscope_ai::{ArtifactKind, Prediction, Visualization};
    use orbitscope_batch::{BatchConfig, BatchController};

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn encodes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orbit.png");
        std::fs::write(&path, b"png").unwrap();

        let artifact = ArtifactRef {
            category: "rcp".into(),
            kind: ArtifactKind::Orbit,
            path: path.to_string_lossy().into_owned(),
        };
        let encoded = FileArtifactEncoder.encode(&artifact).unwrap();
        assert_eq!(encoded.bytes, Some(3));
        assert_eq!(encoded.sha256.as_deref(), Some(sha256_hex(b"png").as_str()));
        assert!(encoded.url.starts_with("file:///"));
        assert!(encoded.url.ends_with("/orbit.png"));
    }

    #[test]
    fn missing_file_is_an_artifact_error() {
        let artifact = ArtifactRef {
            category: "rcp".into(),
            kind: ArtifactKind::Heatmap,
            path: "/no/such/heatmap.png".into(),
        };
        match FileArtifactEncoder.encode(&artifact) {
            Err(ExportError::Artifact { path, .. }) => assert_eq!(path, "/no/such/heatmap.png"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn visual_export_reads_artifacts_off_the_async_workers() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<String> = (0..10)
            .map(|i| {
                let path = dir.path().join(format!("t{i}.png"));
                std::fs::write(&path, [i as u8; 4]).unwrap();
                path.to_string_lossy().into_owned()
            })
            .collect();

        let client = FakeInferenceClient::arc();
        client.script(
            "a.bin",
            Ok(Prediction::new("normal").with_visualization(
                "rcp",
                Visualization {
                    temporal: frames,
                    ..Visualization::default()
                },
            )),
        );
        let ctl = BatchController::new(client, BatchConfig::default()).unwrap();
        ctl.run(["a.bin"], 1).await.unwrap();
        let jobs = ctl.jobs().unwrap();

        match build_export(&jobs, ExportFormat::Visual).await.unwrap() {
            ExportDocument::Visual(export) => {
                assert_eq!(export.rows.len(), 1);
                let artifacts = &export.rows[0].artifacts;
                assert_eq!(artifacts.len(), 10);
                assert!(artifacts.iter().all(|a| a.bytes == Some(4)));
            }
            other => panic!("unexpected document: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_artifact_fails_the_blocking_export() {
        let client = Arc::new(FakeInferenceClient::new());
        client.script(
            "a.bin",
            Ok(Prediction::new("normal").with_visualization(
                "rcp",
                Visualization {
                    orbit: Some("/no/such/orbit.png".into()),
                    ..Visualization::default()
                },
            )),
        );
        let ctl = BatchController::new(client, BatchConfig::default()).unwrap();
        ctl.run(["a.bin"], 1).await.unwrap();

        let err = build_export(&ctl.jobs().unwrap(), ExportFormat::Visual)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Artifact { .. }));
    }
}
