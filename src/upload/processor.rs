//! External processing job
//!
//! Runs the preprocessing program as a child process. The job receives the
//! persisted file paths, the declared steps and the submit options as three
//! JSON arguments after the configured leading arguments, and reports its
//! result through the exit status:
//!
//! | exit code | meaning |
//! |-----------|---------|
//! | 0 | processed files written in place |
//! | 1 | recognized processing failure |
//! | other / signal | unexpected failure |

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use super::types::{StepSpec, SubmitError, SubmitOptions};
use crate::config::ProcessorConfig;

/// Spawns and supervises processing jobs
#[derive(Debug, Clone)]
pub struct JobRunner {
    config: ProcessorConfig,
}

impl JobRunner {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    /// Run the job to completion, or until the configured timeout.
    ///
    /// The child is killed on timeout and whenever this future is dropped.
    pub async fn run(
        &self,
        session_id: Uuid,
        files: &[PathBuf],
        steps: &[StepSpec],
        options: &SubmitOptions,
    ) -> Result<(), SubmitError> {
        let files: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let files_json = serde_json::to_string(&files)?;
        let steps_json = serde_json::to_string(steps)?;
        let options_json = serde_json::to_string(options)?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(files_json)
            .arg(steps_json)
            .arg(options_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(SubmitError::Spawn)?;

        tracing::info!(
            session_id = %session_id,
            program = %self.config.program,
            pid = child.id(),
            files = files.len(),
            steps = steps.len(),
            "Started processing job"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, session_id, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, session_id, OutputStream::Stderr));
        }

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(SubmitError::Wait(e)),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to kill timed out job");
                }
                return Err(SubmitError::ProcessTimeout(self.config.timeout));
            }
        };

        tracing::info!(session_id = %session_id, code = ?status.code(), "Processing job exited");

        match status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(SubmitError::ProcessFailed),
            code => Err(SubmitError::UnexpectedExit(code)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Relay a child pipe into the log, line by line, until EOF
async fn forward_output<R>(reader: R, session_id: Uuid, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match stream {
                OutputStream::Stdout => tracing::info!(session_id = %session_id, "job: {}", line),
                OutputStream::Stderr => tracing::warn!(session_id = %session_id, "job stderr: {}", line),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Stopped reading job output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell_runner(script: &str, timeout: Duration) -> JobRunner {
        JobRunner::new(ProcessorConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "job".to_string()],
            timeout,
        })
    }

    async fn run(runner: &JobRunner) -> Result<(), SubmitError> {
        runner
            .run(Uuid::new_v4(), &[], &[], &SubmitOptions::default())
            .await
    }

    #[tokio::test]
    async fn test_exit_codes() {
        let timeout = Duration::from_secs(10);

        assert!(run(&shell_runner("exit 0", timeout)).await.is_ok());
        assert!(matches!(
            run(&shell_runner("exit 1", timeout)).await,
            Err(SubmitError::ProcessFailed)
        ));
        assert!(matches!(
            run(&shell_runner("exit 137", timeout)).await,
            Err(SubmitError::UnexpectedExit(Some(137)))
        ));
        assert!(matches!(
            run(&shell_runner("kill -9 $$", timeout)).await,
            Err(SubmitError::UnexpectedExit(None))
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_job() {
        let runner = shell_runner("sleep 30", Duration::from_millis(200));
        let started = std::time::Instant::now();

        let result = run(&runner).await;
        assert!(matches!(result, Err(SubmitError::ProcessTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = JobRunner::new(ProcessorConfig {
            program: "/nonexistent/processor".to_string(),
            args: vec![],
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(run(&runner).await, Err(SubmitError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_arguments_are_json() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("args.txt");
        let script = format!(
            "printf '%s\\n%s\\n%s\\n' \"$1\" \"$2\" \"$3\" > '{}'",
            out.display()
        );
        let runner = shell_runner(&script, Duration::from_secs(10));

        let steps = vec![StepSpec {
            name: "norm".to_string(),
            parameters: serde_json::json!([0, 1]),
        }];
        let options = SubmitOptions {
            request_download: true,
            request_visualizations: false,
        };
        runner
            .run(Uuid::new_v4(), &[PathBuf::from("temp/x/prep_a.csv")], &steps, &options)
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&out).await.unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            serde_json::from_str::<Vec<String>>(lines[0]).unwrap(),
            vec!["temp/x/prep_a.csv"]
        );
        assert_eq!(serde_json::from_str::<Vec<StepSpec>>(lines[1]).unwrap(), steps);
        assert_eq!(
            serde_json::from_str::<SubmitOptions>(lines[2]).unwrap(),
            options
        );
    }
}
