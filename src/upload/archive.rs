//! Result packaging
//!
//! Zips every `prep_*` file in a session directory into
//! `preprocessed.zip`. Runs on the blocking pool.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::storage::PROCESSED_PREFIX;
use super::types::SubmitError;

/// Deflate level used for result archives
const COMPRESSION_LEVEL: i64 = 5;

/// Package the processed files of `dir` into `dest`.
///
/// Returns the number of files stored. The blocking work is not cancelled
/// when the calling task is aborted; a session directory removed meanwhile
/// makes it fail with `NotFound` instead of recreating anything.
pub async fn package(dir: PathBuf, dest: PathBuf) -> Result<usize, SubmitError> {
    let count = tokio::task::spawn_blocking(move || write_archive(&dir, &dest))
        .await
        .map_err(|e| SubmitError::Internal(format!("archive task failed: {e}")))??;
    Ok(count)
}

fn write_archive(dir: &Path, dest: &Path) -> ZipResult<usize> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(PROCESSED_PREFIX) {
            names.push(name);
        }
    }
    names.sort();

    // The session may have been torn down while the listing ran
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("session directory {} is gone", dir.display()),
        )
        .into());
    }

    let temp_path = dest.with_extension("zip.partial");
    let mut zip = ZipWriter::new(BufWriter::new(File::create(&temp_path)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    for name in &names {
        zip.start_file(name.as_str(), options)?;
        let mut source = File::open(dir.join(name))?;
        io::copy(&mut source, &mut zip)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);

    std::fs::rename(&temp_path, dest)?;
    Ok(names.len())
}
