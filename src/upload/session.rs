//! Upload Session State and Registry
//!
//! Manages per-connection upload sessions with:
//! - A process-wide registry keyed by session id
//! - One lock per session so chunk writes never race
//! - Readiness tracking for the submit gate

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::assembler::ChunkAssembler;
use super::readiness;
use super::types::{
    ChunkLimits, CompletionStatus, FileChunk, ReconstructedFile, SessionStatus, StepSpec,
    SubmitOptions, UploadError,
};

// ============================================================================
// Session State
// ============================================================================

/// Everything the server knows about one connection's upload
#[derive(Debug)]
pub struct SessionState {
    id: Uuid,
    created_at: DateTime<Utc>,
    steps: Option<Vec<StepSpec>>,
    expected_file_count: usize,
    files: HashMap<String, ChunkAssembler>,
    /// File names in the order their first chunk arrived
    arrival_order: Vec<String>,
    limits: ChunkLimits,
    status: SessionStatus,
}

/// The work handed to the orchestrator once a submit is accepted
#[derive(Debug)]
pub struct SubmissionJob {
    pub session_id: Uuid,
    pub files: Vec<ReconstructedFile>,
    pub steps: Vec<StepSpec>,
    pub options: SubmitOptions,
}

impl SessionState {
    /// Create an empty session
    pub fn new(id: Uuid, limits: ChunkLimits) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            steps: None,
            expected_file_count: 0,
            files: HashMap::new(),
            arrival_order: Vec::new(),
            limits,
            status: SessionStatus::Collecting,
        }
    }

    /// Replace the declared steps
    pub fn set_steps(&mut self, steps: Vec<StepSpec>) -> Result<(), UploadError> {
        self.ensure_accepting()?;
        self.steps = Some(steps);
        Ok(())
    }

    /// Declare how many files the client will send
    pub fn set_expected_file_count(&mut self, count: i64) -> Result<(), UploadError> {
        self.ensure_accepting()?;
        let count = usize::try_from(count).map_err(|_| UploadError::InvalidCount(count))?;
        self.expected_file_count = count;
        Ok(())
    }

    /// Route a chunk to its file's assembler, creating one on first sight
    pub fn record_chunk(&mut self, chunk: &FileChunk) -> Result<CompletionStatus, UploadError> {
        self.ensure_accepting()?;

        // Once the declared count is reached, unknown names are refused
        if self.expected_file_count > 0
            && self.files.len() >= self.expected_file_count
            && !self.files.contains_key(&chunk.name)
        {
            return Err(UploadError::UnexpectedFile {
                name: chunk.name.clone(),
                expected: self.expected_file_count,
            });
        }

        let (status, size, was_complete) = match self.files.entry(chunk.name.clone()) {
            Entry::Occupied(entry) => {
                let assembler = entry.into_mut();
                let was_complete = assembler.is_complete();
                let status = assembler.add_chunk(chunk)?;
                (status, assembler.declared_size(), was_complete)
            }
            // A rejected first chunk must not claim the file name
            Entry::Vacant(entry) => {
                let mut assembler = ChunkAssembler::new(chunk, self.limits)?;
                let status = assembler.add_chunk(chunk)?;
                let size = assembler.declared_size();
                entry.insert(assembler);
                self.arrival_order.push(chunk.name.clone());
                (status, size, false)
            }
        };

        if status == CompletionStatus::Complete && !was_complete {
            tracing::info!(
                session_id = %self.id,
                file_name = %chunk.name,
                size = size,
                completed = self.completed_file_count(),
                expected = self.expected_file_count,
                "File fully received"
            );
        }

        Ok(status)
    }

    /// Re-run the readiness gate after a state change.
    ///
    /// Returns `true` exactly when the session has just become ready and the
    /// client should be told so.
    pub fn refresh_readiness(&mut self) -> bool {
        let ready = readiness::is_ready(self);
        match (self.status, ready) {
            (SessionStatus::Collecting, true) => {
                self.status = SessionStatus::Ready;
                true
            }
            (SessionStatus::Ready, false) => {
                self.status = SessionStatus::Collecting;
                false
            }
            _ => false,
        }
    }

    /// Accept a submit request and move the completed files out.
    ///
    /// After this the session only records its terminal outcome.
    pub fn take_submission(&mut self, options: SubmitOptions) -> Result<SubmissionJob, UploadError> {
        match self.status {
            SessionStatus::Ready => {}
            SessionStatus::Collecting => return Err(UploadError::NotReady),
            _ => return Err(UploadError::AlreadySubmitted),
        }

        // Ready implies the gate held at the last mutation, but re-check
        // rather than trust the latch.
        if !readiness::is_ready(self) {
            return Err(UploadError::NotReady);
        }

        let mut files = Vec::with_capacity(self.expected_file_count);
        for name in self.arrival_order.drain(..) {
            if let Some(file) = self.files.remove(&name).and_then(ChunkAssembler::into_file) {
                files.push(file);
            }
        }
        self.files.clear();

        self.status = SessionStatus::Submitted;

        Ok(SubmissionJob {
            session_id: self.id,
            files,
            steps: self.steps.clone().unwrap_or_default(),
            options,
        })
    }

    /// Record the orchestration outcome
    pub fn finish(&mut self, succeeded: bool) {
        self.status = if succeeded {
            SessionStatus::Succeeded
        } else {
            SessionStatus::Failed
        };
    }

    fn ensure_accepting(&self) -> Result<(), UploadError> {
        if self.status.accepts_uploads() {
            Ok(())
        } else {
            Err(UploadError::SessionLocked(self.status))
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Time since the connection opened
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn steps(&self) -> Option<&[StepSpec]> {
        self.steps.as_deref()
    }

    pub fn expected_file_count(&self) -> usize {
        self.expected_file_count
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Number of files whose assembler reports complete
    pub fn completed_file_count(&self) -> usize {
        self.files.values().filter(|f| f.is_complete()).count()
    }

    /// Files that started arriving but never completed, in arrival order
    pub fn incomplete_files(&self) -> impl Iterator<Item = &ChunkAssembler> {
        self.arrival_order
            .iter()
            .filter_map(|name| self.files.get(name))
            .filter(|f| !f.is_complete())
    }
}

// ============================================================================
// Session Registry
// ============================================================================

/// Shared handle to one session; the mutex serializes its mutations
pub type SessionHandle = Arc<Mutex<SessionState>>;

/// Process-wide map of live sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

struct SessionRegistryInner {
    /// Active sessions indexed by ID
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,

    /// Limits given to every new session
    limits: ChunkLimits,
}

impl SessionRegistry {
    /// Create a registry with default chunk limits
    pub fn new() -> Self {
        Self::with_limits(ChunkLimits::default())
    }

    /// Create a registry whose sessions use the given limits
    pub fn with_limits(limits: ChunkLimits) -> Self {
        Self {
            inner: Arc::new(SessionRegistryInner {
                sessions: RwLock::new(HashMap::new()),
                limits,
            }),
        }
    }

    /// Register a new session
    pub fn create(&self, id: Uuid) -> Result<SessionHandle, UploadError> {
        let mut sessions = self.inner.sessions.write();
        if sessions.contains_key(&id) {
            return Err(UploadError::DuplicateSession(id));
        }

        let handle = Arc::new(Mutex::new(SessionState::new(id, self.inner.limits)));
        sessions.insert(id, handle.clone());

        tracing::info!(session_id = %id, active = sessions.len(), "Created upload session");
        Ok(handle)
    }

    /// Look up a live session
    pub fn get(&self, id: Uuid) -> Result<SessionHandle, UploadError> {
        self.inner
            .sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(UploadError::UnknownSession(id))
    }

    /// Remove a session, returning its handle
    pub fn remove(&self, id: Uuid) -> Result<SessionHandle, UploadError> {
        let mut sessions = self.inner.sessions.write();
        let handle = sessions.remove(&id).ok_or(UploadError::UnknownSession(id))?;

        tracing::info!(session_id = %id, active = sessions.len(), "Removed upload session");
        Ok(handle)
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
