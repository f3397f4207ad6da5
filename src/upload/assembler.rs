//! Chunk Assembler
//!
//! Rebuilds one file from an unordered stream of fixed-offset chunks.
//! Chunk `i` always lands at byte `i * chunk_size`, so arrival order never
//! matters and re-delivered chunks simply overwrite themselves.

use super::types::{
    is_plain_name, ChunkLimits, CompletionStatus, FileChunk, ReconstructedFile, UploadError,
};

/// Reassembly buffer for a single file
#[derive(Debug)]
pub struct ChunkAssembler {
    name: String,
    mime_type: String,
    declared_size: u64,
    chunk_count: u64,
    chunk_size: usize,
    buffer: Vec<u8>,
    received: Vec<bool>,
    bytes_received: u64,
    complete: bool,
}

impl ChunkAssembler {
    /// Create an assembler from the first chunk seen for a file.
    ///
    /// Validates the file-level fields and allocates the full buffer. The
    /// chunk itself is not written; call [`add_chunk`](Self::add_chunk).
    pub fn new(first: &FileChunk, limits: ChunkLimits) -> Result<Self, UploadError> {
        if !is_plain_name(&first.name) {
            return Err(UploadError::InvalidFileName(first.name.clone()));
        }

        if first.total_size > limits.max_file_size {
            return Err(UploadError::FileTooLarge {
                size: first.total_size,
                max: limits.max_file_size,
            });
        }

        let expected = expected_chunk_count(first.total_size, limits.chunk_size);
        if first.chunk_count != expected {
            return Err(UploadError::InvalidChunkCount {
                name: first.name.clone(),
                declared: first.chunk_count,
                expected,
            });
        }

        Ok(Self {
            name: first.name.clone(),
            mime_type: first.mime_type.clone(),
            declared_size: first.total_size,
            chunk_count: first.chunk_count,
            chunk_size: limits.chunk_size,
            buffer: vec![0; first.total_size as usize],
            received: vec![false; expected as usize],
            bytes_received: 0,
            complete: false,
        })
    }

    /// Write one chunk into place.
    ///
    /// Once the file is complete every further call is a no-op returning
    /// [`CompletionStatus::Complete`]. A rejected chunk leaves the buffer
    /// untouched.
    pub fn add_chunk(&mut self, chunk: &FileChunk) -> Result<CompletionStatus, UploadError> {
        if self.complete {
            return Ok(CompletionStatus::Complete);
        }

        if chunk.total_size != self.declared_size {
            return Err(self.mismatch("totalSize"));
        }
        if chunk.chunk_count != self.chunk_count {
            return Err(self.mismatch("chunkCount"));
        }

        let offset = self.offset_of(chunk.chunk_index)?;
        let expected_len = (self.declared_size - offset).min(self.chunk_size as u64) as usize;

        if chunk.payload.len() < expected_len {
            return Err(UploadError::ChunkLengthMismatch {
                name: self.name.clone(),
                index: chunk.chunk_index,
                expected: expected_len,
                actual: chunk.payload.len(),
            });
        }
        if chunk.payload.len() > expected_len {
            tracing::debug!(
                file_name = %self.name,
                chunk_index = chunk.chunk_index,
                extra = chunk.payload.len() - expected_len,
                "Truncating oversized chunk payload"
            );
        }

        let start = offset as usize;
        self.buffer[start..start + expected_len].copy_from_slice(&chunk.payload[..expected_len]);

        let slot = chunk.chunk_index as usize;
        if !self.received[slot] {
            self.received[slot] = true;
            self.bytes_received += expected_len as u64;
        }

        if self.bytes_received == self.declared_size {
            self.complete = true;
            Ok(CompletionStatus::Complete)
        } else {
            Ok(CompletionStatus::Incomplete)
        }
    }

    /// Byte offset for a chunk index, rejecting anything past the end.
    ///
    /// A zero-byte file has exactly one (empty) chunk at offset 0.
    fn offset_of(&self, index: u64) -> Result<u64, UploadError> {
        let out_of_range = || UploadError::ChunkOutOfRange {
            name: self.name.clone(),
            index,
            declared_size: self.declared_size,
        };

        if self.declared_size == 0 {
            return if index == 0 { Ok(0) } else { Err(out_of_range()) };
        }

        match index.checked_mul(self.chunk_size as u64) {
            Some(offset) if offset < self.declared_size => Ok(offset),
            _ => Err(out_of_range()),
        }
    }

    fn mismatch(&self, field: &'static str) -> UploadError {
        UploadError::ChunkMismatch {
            name: self.name.clone(),
            field,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Indices of chunks that have not arrived yet
    pub fn missing_chunks(&self) -> Vec<u64> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.declared_size == 0 {
            return if self.complete { 100.0 } else { 0.0 };
        }
        (self.bytes_received as f64 / self.declared_size as f64) * 100.0
    }

    /// Hand the finished bytes over for persistence.
    ///
    /// Returns `None` while the file is still incomplete.
    pub fn into_file(self) -> Option<ReconstructedFile> {
        if !self.complete {
            return None;
        }
        Some(ReconstructedFile {
            name: self.name,
            mime_type: self.mime_type,
            declared_size: self.declared_size,
            bytes: self.buffer,
        })
    }
}

/// Number of chunks a file of `total_size` bytes is split into
pub fn expected_chunk_count(total_size: u64, chunk_size: usize) -> u64 {
    if total_size == 0 {
        return 1;
    }
    total_size.div_ceil(chunk_size as u64)
}
