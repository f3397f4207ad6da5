//! WebSocket message types
//!
//! Every frame is JSON text shaped `{"type": "...", "payload": ...}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::upload::types::{FileChunk, StepSpec, SubmitOptions, UploadError};

/// Messages sent by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ordered processing steps
    Steps(Vec<StepSpec>),
    /// Number of files that will be uploaded
    FileCount(i64),
    /// One chunk of one file
    FileChunk(FileChunk),
    /// Start processing
    Submit(SubmitOptions),
    /// Client is leaving
    Disconnect,
}

impl ClientMessage {
    /// Parse one text frame
    pub fn from_text(text: &str) -> Result<Self, UploadError> {
        serde_json::from_str(text).map_err(|e| UploadError::Malformed(e.to_string()))
    }

    /// Message name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Steps(_) => "steps",
            Self::FileCount(_) => "file-count",
            Self::FileChunk(_) => "file-chunk",
            Self::Submit(_) => "submit",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Connection accepted; the id keys the fetch endpoints
    #[serde(rename_all = "camelCase")]
    Connection { session_id: Uuid },
    /// A request was accepted
    Ack { message: String },
    /// Steps and all files received; submit is now allowed
    ReadyToSubmit,
    /// Result archive can be fetched from `/download/{sessionId}`
    DownloadReady,
    /// Processing failed or the request was refused
    Error,
    /// Server is closing the session
    Disconnect,
}
