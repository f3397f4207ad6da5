//! Chunked Upload Module
//!
//! Session-scoped upload and submission pipeline:
//! - Out-of-order chunk reassembly with byte-exact completion checks
//! - Per-connection session state behind a process-wide registry
//! - A readiness gate that opens once steps and every file have arrived
//! - Orchestration of the external processing job and result packaging
//!
//! Protocol Flow:
//! 1. Client declares steps and the number of files (any order)
//! 2. Client streams fixed-size chunks for each file, possibly interleaved
//! 3. Server signals `ready-to-submit` once the gate opens
//! 4. Client submits; server persists, runs the job and packages the result

pub mod archive;
pub mod assembler;
pub mod orchestrator;
pub mod processor;
pub mod readiness;
pub mod session;
pub mod storage;
pub mod types;

pub use assembler::ChunkAssembler;
pub use orchestrator::SubmissionOrchestrator;
pub use processor::JobRunner;
pub use session::{SessionHandle, SessionRegistry, SessionState, SubmissionJob};
pub use storage::SessionStorage;
pub use types::*;
