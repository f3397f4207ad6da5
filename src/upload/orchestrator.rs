//! Submission Orchestrator
//!
//! persist -> run processing job -> package results. Each stage is a
//! possible failure point; the caller only learns success or the error.
//! Packaging is skipped when the client did not ask for a download.

use std::path::PathBuf;
use std::time::Instant;

use super::archive;
use super::processor::JobRunner;
use super::session::SubmissionJob;
use super::storage::SessionStorage;
use super::types::SubmitError;

/// Runs accepted submissions
#[derive(Debug, Clone)]
pub struct SubmissionOrchestrator {
    storage: SessionStorage,
    runner: JobRunner,
}

impl SubmissionOrchestrator {
    pub fn new(storage: SessionStorage, runner: JobRunner) -> Self {
        Self { storage, runner }
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    /// Process one submission.
    ///
    /// Returns the archive path, or `None` when no download was requested.
    pub async fn run(&self, job: SubmissionJob) -> Result<Option<PathBuf>, SubmitError> {
        let started = Instant::now();
        let SubmissionJob {
            session_id,
            files,
            steps,
            options,
        } = job;

        tracing::info!(
            session_id = %session_id,
            files = files.len(),
            steps = steps.len(),
            request_download = options.request_download,
            request_visualizations = options.request_visualizations,
            "Starting submission"
        );

        let paths = self
            .storage
            .persist_files(session_id, &files)
            .await
            .map_err(SubmitError::Storage)?;
        drop(files);

        self.runner.run(session_id, &paths, &steps, &options).await?;

        if !options.request_download {
            tracing::info!(
                session_id = %session_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Submission complete"
            );
            return Ok(None);
        }

        let archive_path = self.storage.archive_path(session_id);
        let packaged = archive::package(self.storage.session_dir(session_id), archive_path.clone()).await?;

        tracing::info!(
            session_id = %session_id,
            packaged = packaged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Submission complete"
        );

        Ok(Some(archive_path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ProcessorConfig;
    use crate::upload::types::{ReconstructedFile, StepSpec, SubmitOptions};
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Orchestrator whose job is the given shell script
    pub(crate) fn shell_orchestrator(root: &std::path::Path, script: &str) -> SubmissionOrchestrator {
        SubmissionOrchestrator::new(
            SessionStorage::new(root),
            JobRunner::new(ProcessorConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string(), "job".to_string()],
                timeout: Duration::from_secs(10),
            }),
        )
    }

    fn job_with(session_id: Uuid, bytes: &[u8]) -> SubmissionJob {
        SubmissionJob {
            session_id,
            files: vec![ReconstructedFile {
                name: "a.csv".to_string(),
                mime_type: "text/csv".to_string(),
                declared_size: bytes.len() as u64,
                bytes: bytes.to_vec(),
            }],
            steps: vec![StepSpec {
                name: "stand".to_string(),
                parameters: serde_json::Value::Null,
            }],
            options: SubmitOptions {
                request_download: true,
                request_visualizations: false,
            },
        }
    }

    fn job(session_id: Uuid) -> SubmissionJob {
        job_with(session_id, b"1,2\n")
    }

    fn archive_entries(path: &std::path::Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).unwrap();
                (entry.name().to_string(), bytes)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_successful_submission_packages_results() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = shell_orchestrator(temp_dir.path(), "exit 0");
        let id = Uuid::new_v4();

        let archive = orchestrator.run(job(id)).await.unwrap().unwrap();
        assert_eq!(archive, temp_dir.path().join(id.to_string()).join("preprocessed.zip"));
        assert!(archive.exists());
        assert!(temp_dir.path().join(id.to_string()).join("prep_a.csv").exists());
    }

    #[tokio::test]
    async fn test_no_archive_without_download_request() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = shell_orchestrator(temp_dir.path(), "exit 0");
        let id = Uuid::new_v4();

        let mut job = job(id);
        job.options.request_download = false;

        assert_eq!(orchestrator.run(job).await.unwrap(), None);
        assert!(temp_dir.path().join(id.to_string()).join("prep_a.csv").exists());
        assert!(!orchestrator.storage().archive_path(id).exists());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_with_same_file_name_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        // Each job appends a marker so the processed file differs from the upload
        let orchestrator = shell_orchestrator(temp_dir.path(), "sleep 0.2; for f in $(echo \"$1\" | tr -d '[]\"' | tr ',' ' '); do echo done >> \"$f\"; done");
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, b) = tokio::join!(
            orchestrator.run(job_with(first, b"first\n")),
            orchestrator.run(job_with(second, b"second\n")),
        );
        let archives = [a.unwrap().unwrap(), b.unwrap().unwrap()];

        for (id, archive, expected) in [
            (first, &archives[0], b"first\ndone\n".to_vec()),
            (second, &archives[1], b"second\ndone\n".to_vec()),
        ] {
            let processed = temp_dir.path().join(id.to_string()).join("prep_a.csv");
            assert_eq!(std::fs::read(&processed).unwrap(), expected);
            assert_eq!(archive_entries(archive), vec![("prep_a.csv".to_string(), expected)]);
        }
    }

    #[tokio::test]
    async fn test_failed_job_produces_no_archive() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = shell_orchestrator(temp_dir.path(), "exit 1");
        let id = Uuid::new_v4();

        let result = orchestrator.run(job(id)).await;
        assert!(matches!(result, Err(SubmitError::ProcessFailed)));
        assert!(!orchestrator.storage().archive_path(id).exists());
    }

    #[tokio::test]
    async fn test_storage_failure() {
        let temp_dir = TempDir::new().unwrap();
        // A file where the storage root should be makes every mkdir fail
        let root = temp_dir.path().join("blocked");
        std::fs::write(&root, b"not a directory").unwrap();
        let orchestrator = shell_orchestrator(&root, "exit 0");

        let result = orchestrator.run(job(Uuid::new_v4())).await;
        assert!(matches!(result, Err(SubmitError::Storage(_))));
    }
}
