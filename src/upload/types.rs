//! Upload types for the chunked relay protocol

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Nominal chunk size agreed with the browser client: 100,000 bytes
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Maximum declared file size: 500MB
pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Limits applied while reassembling chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Byte distance between consecutive chunk offsets
    pub chunk_size: usize,

    /// Largest `totalSize` a client may declare
    pub max_file_size: u64,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

// ============================================================================
// Inbound Payloads
// ============================================================================

/// One processing step declared by the client.
///
/// The server never interprets steps; they are forwarded verbatim to the
/// external job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step identifier understood by the processing job
    pub name: String,

    /// Step parameters (older clients call this `inputs`)
    #[serde(default, alias = "inputs")]
    pub parameters: serde_json::Value,
}

/// One byte range of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    /// File name, unique within a session
    pub name: String,

    /// MIME type reported by the browser
    #[serde(default)]
    pub mime_type: String,

    /// Declared size of the whole file in bytes
    pub total_size: u64,

    /// 0-based position of this chunk
    pub chunk_index: u64,

    /// Declared number of chunks for the file
    pub chunk_count: u64,

    /// Raw chunk bytes, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Options sent alongside `submit`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    #[serde(default)]
    pub request_download: bool,

    #[serde(default)]
    pub request_visualizations: bool,
}

// ============================================================================
// Assembly Results
// ============================================================================

/// Outcome of feeding one chunk to an assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// More bytes are still missing
    Incomplete,
    /// Every declared byte has arrived
    Complete,
}

/// A file whose bytes have been fully reassembled
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedFile {
    pub name: String,
    pub mime_type: String,
    pub declared_size: u64,
    pub bytes: Vec<u8>,
}

// ============================================================================
// Session Status
// ============================================================================

/// Where a session is in its upload/processing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Waiting for steps, file count or chunks
    Collecting,
    /// Readiness gate satisfied, client notified
    Ready,
    /// Submission accepted, orchestration running
    Submitted,
    /// Result archive available
    Succeeded,
    /// Orchestration ended in error
    Failed,
}

impl SessionStatus {
    /// Whether inbound uploads may still mutate the session
    pub fn accepts_uploads(self) -> bool {
        matches!(self, Self::Collecting | Self::Ready)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Protocol and session errors.
///
/// None of these end the connection; the offending message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Session already exists: {0}")]
    DuplicateSession(Uuid),

    #[error("Session not found: {0}")]
    UnknownSession(Uuid),

    #[error("Invalid file count: {0}")]
    InvalidCount(i64),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Chunk count for {name} is {declared}, expected {expected}")]
    InvalidChunkCount {
        name: String,
        declared: u64,
        expected: u64,
    },

    #[error("Chunk {index} of {name} is outside its {declared_size} declared bytes")]
    ChunkOutOfRange {
        name: String,
        index: u64,
        declared_size: u64,
    },

    #[error("Chunk of {name} disagrees with earlier chunks on {field}")]
    ChunkMismatch { name: String, field: &'static str },

    #[error("Chunk {index} of {name} carries {actual} bytes, expected {expected}")]
    ChunkLengthMismatch {
        name: String,
        index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Unexpected file {name}: all {expected} declared files already started")]
    UnexpectedFile { name: String, expected: usize },

    #[error("Session no longer accepts uploads (status: {0:?})")]
    SessionLocked(SessionStatus),

    #[error("Submission requested before all steps and files arrived")]
    NotReady,

    #[error("Session already submitted")]
    AlreadySubmitted,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Reasons a submission ends in `error` instead of `download-ready`
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),

    #[error("Failed to encode job arguments: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to spawn processing job: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to wait for processing job: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Processing job reported failure")]
    ProcessFailed,

    #[error("Processing job exited unexpectedly (code: {0:?})")]
    UnexpectedExit(Option<i32>),

    #[error("Processing job timed out after {0:?}")]
    ProcessTimeout(std::time::Duration),

    #[error("Failed to package results: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Whether this is the job's own, recognized failure mode
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::ProcessFailed)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Check that a client-supplied name is a single path component.
///
/// Names end up inside `temp/{sessionId}/`, so separators, parent
/// references and NUL bytes are refused.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_chunk_wire_format() {
        let json = r#"{
            "name": "data.csv",
            "mimeType": "text/csv",
            "totalSize": 5,
            "chunkIndex": 0,
            "chunkCount": 1,
            "payload": "aGVsbG8="
        }"#;

        let chunk: FileChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.name, "data.csv");
        assert_eq!(chunk.payload, b"hello");
    }

    #[test]
    fn test_bad_base64_rejected() {
        let json = r#"{"name":"a","totalSize":1,"chunkIndex":0,"chunkCount":1,"payload":"***"}"#;
        assert!(serde_json::from_str::<FileChunk>(json).is_err());
    }

    #[test]
    fn test_step_accepts_inputs_alias() {
        let step: StepSpec = serde_json::from_str(r#"{"name":"norm","inputs":[0,1]}"#).unwrap();
        assert_eq!(step.parameters, serde_json::json!([0, 1]));

        let bare: StepSpec = serde_json::from_str(r#"{"name":"stand"}"#).unwrap();
        assert!(bare.parameters.is_null());
    }

    #[test]
    fn test_plain_names() {
        assert!(is_plain_name("series.csv"));
        assert!(is_plain_name("..hidden"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("../etc/passwd"));
        assert!(!is_plain_name("a\\b"));
    }
}
