use std::{
    fs::{self, File},
    io::{self, Cursor},
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::debug;
use zip::ZipArchive;

use crate::core::TangoError;

/// Exclusively-owned extraction area for one import. The backing temp
/// directory is removed when the workspace is dropped, on every exit path.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Unpacks an uploaded `.apkg` (zip) into a fresh workspace, preserving
/// relative paths and creating parent directories as needed.
///
/// Entry names are never trusted: an entry that would land outside the
/// workspace root is rejected as a corrupt archive.
pub fn extract_archive(bytes: &[u8]) -> Result<Workspace, TangoError> {
    if bytes.is_empty() {
        return Err(TangoError::CorruptArchive("empty upload".to_string()));
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| TangoError::CorruptArchive(e.to_string()))?;

    let dir = TempDir::with_prefix("anki-import-")?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                return Err(TangoError::CorruptArchive(format!(
                    "entry escapes archive root: {}",
                    entry.name()
                )));
            }
        };

        let target = dir.path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        debug!("Extracted entry: {}", entry.name());
    }

    Ok(Workspace { dir })
}
