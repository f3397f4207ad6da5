//! Session Storage
//!
//! On-disk layout for submitted sessions:
//!
//! ```text
//! {root}/{session_id}/prep_{file_name}          reconstructed, then processed in place
//! {root}/{session_id}/{type}-{when}-prep_{file_name}.png   diagnostic graphs
//! {root}/{session_id}/preprocessed.zip          packaged result
//! ```

use std::io;
use std::path::PathBuf;

use uuid::Uuid;

use super::types::{is_plain_name, ReconstructedFile};

/// Prefix given to every file handed to the processing job
pub const PROCESSED_PREFIX: &str = "prep_";

/// Name of the packaged result inside a session directory
pub const RESULT_ARCHIVE: &str = "preprocessed.zip";

/// Local filesystem storage rooted at one directory
#[derive(Debug, Clone)]
pub struct SessionStorage {
    root: PathBuf,
}

impl SessionStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    pub fn archive_path(&self, session_id: Uuid) -> PathBuf {
        self.session_dir(session_id).join(RESULT_ARCHIVE)
    }

    /// Path of a graph produced by the processing job.
    ///
    /// Returns `None` if any component could escape the session directory.
    pub fn graph_path(
        &self,
        session_id: Uuid,
        file_name: &str,
        when: &str,
        graph_type: &str,
    ) -> Option<PathBuf> {
        if ![file_name, when, graph_type].iter().all(|part| is_plain_name(part)) {
            return None;
        }
        let name = format!("{graph_type}-{when}-{PROCESSED_PREFIX}{file_name}.png");
        Some(self.session_dir(session_id).join(name))
    }

    /// Create the root and clear session directories left by a previous run.
    ///
    /// Returns the number of stale entries removed.
    pub async fn prepare(&self) -> io::Result<usize> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale entry");
                }
            }
        }

        Ok(removed)
    }

    /// Write reconstructed files as `prep_{name}` in the session directory.
    ///
    /// Each file is written under a hidden temporary name and renamed, so a
    /// partially written file never appears under its final name. Returns
    /// the final paths in input order.
    pub async fn persist_files(
        &self,
        session_id: Uuid,
        files: &[ReconstructedFile],
    ) -> io::Result<Vec<PathBuf>> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            if !is_plain_name(&file.name) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("refusing to persist {:?}", file.name),
                ));
            }

            let final_name = format!("{PROCESSED_PREFIX}{}", file.name);
            let final_path = dir.join(&final_name);
            let temp_path = dir.join(format!(".{final_name}.partial"));

            tokio::fs::write(&temp_path, &file.bytes).await?;
            tokio::fs::rename(&temp_path, &final_path).await?;

            tracing::debug!(
                session_id = %session_id,
                path = %final_path.display(),
                size = file.bytes.len(),
                "Persisted reconstructed file"
            );
            paths.push(final_path);
        }

        Ok(paths)
    }

    /// Delete a session directory. A missing directory is not an error.
    ///
    /// Returns whether anything was removed.
    pub async fn remove_session(&self, session_id: Uuid) -> io::Result<bool> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(name: &str, bytes: &[u8]) -> ReconstructedFile {
        ReconstructedFile {
            name: name.to_string(),
            mime_type: "text/csv".to_string(),
            declared_size: bytes.len() as u64,
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_persist_files() {
        let temp_dir = TempDir::new().unwrap();
        let storage = SessionStorage::new(temp_dir.path());
        let id = Uuid::new_v4();

        let paths = storage
            .persist_files(id, &[file("b.csv", b"1,2"), file("a.csv", b"3,4")])
            .await
            .unwrap();

        assert_eq!(paths[0], storage.session_dir(id).join("prep_b.csv"));
        assert_eq!(tokio::fs::read(&paths[1]).await.unwrap(), b"3,4");

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(storage.session_dir(id)).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        assert_eq!(names, vec!["prep_a.csv", "prep_b.csv"]);
    }

    #[tokio::test]
    async fn test_remove_session_tolerates_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let storage = SessionStorage::new(temp_dir.path());
        let id = Uuid::new_v4();

        assert!(!storage.remove_session(id).await.unwrap());

        storage.persist_files(id, &[file("a.csv", b"x")]).await.unwrap();
        assert!(storage.remove_session(id).await.unwrap());
        assert!(!storage.session_dir(id).exists());
    }

    #[tokio::test]
    async fn test_prepare_clears_stale_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("temp");
        let storage = SessionStorage::new(&root);

        assert_eq!(storage.prepare().await.unwrap(), 0);
        storage
            .persist_files(Uuid::new_v4(), &[file("a.csv", b"x")])
            .await
            .unwrap();
        tokio::fs::write(root.join("stray.txt"), b"x").await.unwrap();

        assert_eq!(storage.prepare().await.unwrap(), 2);
        assert!(root.exists());
    }

    #[test]
    fn test_graph_path_validation() {
        let storage = SessionStorage::new("temp");
        let id = Uuid::new_v4();

        let path = storage.graph_path(id, "a.csv", "orig", "hist").unwrap();
        assert!(path.ends_with("hist-orig-prep_a.csv.png"));
        assert!(storage.graph_path(id, "..", "orig", "hist").is_none());
        assert!(storage.graph_path(id, "a.csv", "../x", "hist").is_none());
    }
}
