use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use tracing::{info, warn};
use zstd::stream::copy_decode;

use crate::core::TangoError;

const LEGACY_FILE: &str = "collection.anki2";
const NEWER_FILE: &str = "collection.anki21";
const COMPRESSED_FILE: &str = "collection.anki21b";
const DECOMPRESSED_FILE: &str = "collection_decompressed.anki2";

// Exporters since Anki 2.1.50 can leave a placeholder legacy file while the
// real data lives only in the zstd-compressed sibling.
const LEGACY_PLACEHOLDER_THRESHOLD: u64 = 100_000;
const COMPRESSED_SIZE_MULTIPLIER: u64 = 2;

/// Resolves the collection database inside an extracted archive, preferring
/// the compressed-newest variant when the legacy file looks like a
/// placeholder. A variant that fails to decompress is logged and skipped
/// rather than aborting the import.
pub fn locate_collection(root: &Path) -> Result<PathBuf, TangoError> {
    let legacy = root.join(LEGACY_FILE);
    let newer = root.join(NEWER_FILE);
    let compressed = root.join(COMPRESSED_FILE);

    if compressed.exists() {
        let compressed_size = file_size(&compressed);
        let legacy_size = if legacy.exists() { file_size(&legacy) } else { 0 };

        if compressed_size > legacy_size * COMPRESSED_SIZE_MULTIPLIER
            || legacy_size < LEGACY_PLACEHOLDER_THRESHOLD
        {
            let target = root.join(DECOMPRESSED_FILE);
            match decompress_zstd(&compressed, &target) {
                Ok(()) => {
                    info!(
                        "Decompressed {} to {} ({} bytes)",
                        COMPRESSED_FILE,
                        DECOMPRESSED_FILE,
                        file_size(&target)
                    );
                    return Ok(target);
                }
                Err(e) => warn!("Failed to decompress {}: {}", COMPRESSED_FILE, e),
            }
        }
    }

    if legacy.exists() {
        return Ok(legacy);
    }
    if newer.exists() {
        return Ok(newer);
    }

    // Some exporters place the database under a deck-specific name.
    let mut names: Vec<String> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    for name in &names {
        if name.ends_with(".anki21b") {
            let target = root.join(name.replace(".anki21b", "_decompressed.anki2"));
            match decompress_zstd(&root.join(name), &target) {
                Ok(()) => return Ok(target),
                Err(e) => warn!("Failed to decompress {}: {}", name, e),
            }
        }
    }
    for name in &names {
        if name.ends_with(".anki2") {
            return Ok(root.join(name));
        }
    }
    for name in &names {
        if name.ends_with(".anki21") {
            return Ok(root.join(name));
        }
    }

    Err(TangoError::CollectionNotFound)
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

fn decompress_zstd(input: &Path, output: &Path) -> Result<(), TangoError> {
    let reader = BufReader::new(File::open(input)?);
    let writer = BufWriter::new(File::create(output)?);
    copy_decode(reader, writer)?;
    Ok(())
}
