//! Connection Handler
//!
//! Binds one client connection to its upload session. Inbound messages are
//! handled strictly in arrival order; protocol errors are logged and the
//! offending message dropped. Submissions run on their own task so the
//! message loop never blocks on the processing job.

use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::{ClientMessage, ServerMessage};
use crate::upload::{
    SessionHandle, SessionRegistry, SessionState, SubmissionOrchestrator, SubmitOptions,
    UploadError,
};

/// Outbound half of a connection
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Per-connection protocol state machine
pub struct ConnectionHandler {
    session_id: Uuid,
    registry: SessionRegistry,
    orchestrator: SubmissionOrchestrator,
    outbound: Outbound,
    submission: Option<JoinHandle<()>>,
}

impl ConnectionHandler {
    /// Register a fresh session and greet the client
    pub fn open(
        registry: SessionRegistry,
        orchestrator: SubmissionOrchestrator,
        outbound: Outbound,
    ) -> Result<Self, UploadError> {
        let session_id = Uuid::new_v4();
        registry.create(session_id)?;

        let handler = Self {
            session_id,
            registry,
            orchestrator,
            outbound,
            submission: None,
        };
        handler.send(ServerMessage::Connection { session_id });

        tracing::info!(session_id = %session_id, "Client connected");
        Ok(handler)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Handle one raw text frame
    pub async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        match ClientMessage::from_text(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Dropped unparseable frame");
                ControlFlow::Continue(())
            }
        }
    }

    /// Handle one parsed message. `Break` means the client asked to leave.
    pub async fn handle(&mut self, message: ClientMessage) -> ControlFlow<()> {
        if message == ClientMessage::Disconnect {
            return ControlFlow::Break(());
        }

        let kind = message.kind();
        match self.dispatch(message).await {
            Ok(()) => {}
            Err(UploadError::NotReady) => {
                tracing::warn!(session_id = %self.session_id, "Submit refused: session not ready");
                self.send(ServerMessage::Error);
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    message = kind,
                    error = %e,
                    "Dropped protocol message"
                );
            }
        }
        ControlFlow::Continue(())
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), UploadError> {
        match message {
            ClientMessage::Steps(steps) => {
                let handle = self.session()?;
                let mut session = handle.lock().await;
                tracing::debug!(session_id = %self.session_id, steps = steps.len(), "Steps declared");
                session.set_steps(steps)?;
                self.notify_if_ready(&mut session);
            }
            ClientMessage::FileCount(count) => {
                let handle = self.session()?;
                let mut session = handle.lock().await;
                tracing::debug!(session_id = %self.session_id, count = count, "File count declared");
                session.set_expected_file_count(count)?;
                self.notify_if_ready(&mut session);
            }
            ClientMessage::FileChunk(chunk) => {
                let handle = self.session()?;
                let mut session = handle.lock().await;
                session.record_chunk(&chunk)?;
                self.notify_if_ready(&mut session);
            }
            ClientMessage::Submit(options) => self.submit(options).await?,
            ClientMessage::Disconnect => {}
        }
        Ok(())
    }

    fn session(&self) -> Result<SessionHandle, UploadError> {
        self.registry.get(self.session_id)
    }

    fn notify_if_ready(&self, session: &mut SessionState) {
        if session.refresh_readiness() {
            tracing::info!(
                session_id = %self.session_id,
                files = session.completed_file_count(),
                "Session ready to submit"
            );
            self.send(ServerMessage::ReadyToSubmit);
        }
    }

    /// Accept a submit and start orchestration in the background
    async fn submit(&mut self, options: SubmitOptions) -> Result<(), UploadError> {
        let handle = self.session()?;
        let job = handle.lock().await.take_submission(options)?;
        self.send(ServerMessage::Ack {
            message: "submit".to_string(),
        });

        let session_id = self.session_id;
        let registry = self.registry.clone();
        let orchestrator = self.orchestrator.clone();
        let outbound = self.outbound.clone();

        self.submission = Some(tokio::spawn(async move {
            let result = orchestrator.run(job).await;

            match &result {
                Ok(Some(archive)) => tracing::info!(
                    session_id = %session_id,
                    archive = %archive.display(),
                    "Download ready"
                ),
                Ok(None) => tracing::info!(session_id = %session_id, "Processing complete, no archive requested"),
                Err(e) if e.is_expected() => {
                    tracing::warn!(session_id = %session_id, error = %e, "Processing failed")
                }
                Err(e) => tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    error_debug = ?e,
                    "Submission aborted"
                ),
            }

            // The client may have left while the job ran
            let Ok(handle) = registry.get(session_id) else {
                tracing::debug!(session_id = %session_id, "Session gone, discarding outcome");
                return;
            };
            handle.lock().await.finish(result.is_ok());

            let message = if result.is_ok() {
                ServerMessage::DownloadReady
            } else {
                ServerMessage::Error
            };
            let _ = outbound.send(message);
        }));

        Ok(())
    }

    fn send(&self, message: ServerMessage) {
        // A closed channel means the socket is already gone
        let _ = self.outbound.send(message);
    }

    /// Tear the session down: stop any running job, drop the session and
    /// reclaim its storage. The client is sent a final `disconnect`.
    pub async fn close(mut self) {
        if let Some(task) = self.submission.take() {
            task.abort();
            let _ = task.await;
        }

        let mut age_ms = None;
        match self.registry.remove(self.session_id) {
            Ok(handle) => {
                let session = handle.lock().await;
                for file in session.incomplete_files() {
                    tracing::warn!(
                        session_id = %self.session_id,
                        file_name = %file.name(),
                        received = file.bytes_received(),
                        declared = file.declared_size(),
                        progress = file.progress(),
                        missing_chunks = file.missing_chunks().len(),
                        "Discarding incomplete file"
                    );
                }
                tracing::debug!(session_id = %self.session_id, status = ?session.status(), "Session closed");
                age_ms = Some(session.age().num_milliseconds());
            }
            Err(e) => {
                tracing::debug!(session_id = %self.session_id, error = %e, "Session already removed");
            }
        }

        match self.orchestrator.storage().remove_session(self.session_id).await {
            Ok(true) => tracing::debug!(session_id = %self.session_id, "Removed session storage"),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                session_id = %self.session_id,
                error = %e,
                "Failed to remove session storage"
            ),
        }

        self.send(ServerMessage::Disconnect);
        tracing::info!(session_id = %self.session_id, age_ms = ?age_ms, "Client disconnected");
    }
}
