use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{NormalizedItem, TangoError};

const MANIFEST_FILE: &str = "media";

/// Storage location and public URL prefix for relocated media files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub storage_dir: PathBuf,
    pub base_url: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig { storage_dir: PathBuf::from("./media"), base_url: "/api/media".to_string() }
    }
}

pub struct MediaStore {
    config: MediaConfig,
}

/// Parses the archive's `media` manifest: a JSON object mapping numeric
/// stored names to original filenames. An absent or unreadable manifest
/// means no media processing.
pub fn parse_manifest(root: &Path) -> HashMap<String, String> {
    let path = root.join(MANIFEST_FILE);
    if !path.exists() {
        return HashMap::new();
    }

    let parsed = fs::read_to_string(&path)
        .map_err(TangoError::from)
        .and_then(|content| {
            serde_json::from_str::<HashMap<String, String>>(&content).map_err(TangoError::from)
        });

    match parsed {
        Ok(map) => {
            debug!("Found {} media files in manifest", map.len());
            map
        }
        Err(e) => {
            warn!("Failed to parse media manifest: {}", e);
            HashMap::new()
        }
    }
}

impl MediaStore {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Copies each referenced archive file into permanent storage under a
    /// unique per-import prefix, returning original filename -> stable URL.
    pub fn relocate(
        &self,
        root: &Path,
        manifest: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, TangoError> {
        let mut urls = HashMap::new();
        if manifest.is_empty() {
            return Ok(urls);
        }

        fs::create_dir_all(&self.config.storage_dir)?;

        // Prefix keeps repeated imports of same-named files from colliding.
        let import_prefix: String = Uuid::new_v4().simple().to_string()[..8].to_string();

        for (stored_name, original_name) in manifest {
            let source = root.join(stored_name);
            if !source.is_file() {
                debug!("Media file {} not present in archive", stored_name);
                continue;
            }

            let dest_name = format!("{}_{}", import_prefix, sanitize_filename(original_name));
            let dest = self.config.storage_dir.join(&dest_name);
            if let Err(e) = fs::copy(&source, &dest) {
                warn!("Failed to store media file {}: {}", original_name, e);
                continue;
            }

            urls.insert(
                original_name.clone(),
                format!("{}/{}", self.config.base_url, dest_name),
            );
        }

        info!("Stored {} media files", urls.len());
        Ok(urls)
    }
}

/// Resolves the normalizer's media references against relocated URLs,
/// comma-joining multiple references into one field.
pub fn resolve_references(items: &mut [NormalizedItem], urls: &HashMap<String, String>) {
    if urls.is_empty() {
        return;
    }

    for item in items {
        let audio: Vec<&str> =
            item.audio_refs.iter().filter_map(|name| urls.get(name).map(String::as_str)).collect();
        if !audio.is_empty() {
            item.audio_url = Some(audio.join(","));
        }

        let images: Vec<&str> =
            item.image_refs.iter().filter_map(|name| urls.get(name).map(String::as_str)).collect();
        if !images.is_empty() {
            item.image_url = Some(images.join(","));
        }
    }
}

/// Replaces path separators and shell-special characters before a filename
/// becomes a storage key.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
