use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::TangoError;

/// Anki separates fields within one note payload with the ASCII Unit
/// Separator (0x1f).
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// Caps memory and import time for oversized decks; rows past the limit are
/// intentionally not imported.
pub const NOTE_ROW_LIMIT: usize = 10_000;

const NOTES_QUERY: &str = "SELECT id, flds FROM notes LIMIT 10000";

/// One raw record from the `notes` table, fields still joined by the
/// separator byte.
#[derive(Debug, Clone)]
pub struct RawNote {
    pub id: i64,
    pub fields: String,
}

pub fn open_collection(path: &Path) -> Result<Connection, TangoError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    Ok(conn)
}

/// Positional field names from the first note type in `col.models` that
/// declares a non-empty list. Single-model decks are the expected case;
/// fields beyond this list fall back to synthetic names downstream.
pub fn read_field_names(conn: &Connection) -> Vec<String> {
    match query_field_names(conn) {
        Ok(names) => names,
        Err(e) => {
            warn!("Could not parse field names from models: {}", e);
            Vec::new()
        }
    }
}

fn query_field_names(conn: &Connection) -> Result<Vec<String>, TangoError> {
    let models: Option<String> = conn
        .query_row("SELECT models FROM col LIMIT 1", [], |row| row.get(0))
        .optional()?;

    let models = match models {
        Some(json) if !json.is_empty() => json,
        _ => return Ok(Vec::new()),
    };

    let root: Value = serde_json::from_str(&models)?;
    if let Some(map) = root.as_object() {
        for model in map.values() {
            let names: Vec<String> = model["flds"]
                .as_array()
                .map(|flds| {
                    flds.iter()
                        .filter_map(|fld| fld["name"].as_str())
                        .map(|name| name.to_string())
                        .collect()
                })
                .unwrap_or_default();

            if !names.is_empty() {
                return Ok(names);
            }
        }
    }

    Ok(Vec::new())
}

/// Streams the note payloads, capped at [`NOTE_ROW_LIMIT`] rows.
pub fn read_notes(conn: &Connection) -> Result<Vec<RawNote>, TangoError> {
    let mut stmt = conn.prepare(NOTES_QUERY)?;
    let rows = stmt.query_map([], |row| Ok(RawNote { id: row.get(0)?, fields: row.get(1)? }))?;

    let mut notes = Vec::new();
    for note in rows {
        notes.push(note?);
    }
    debug!("Read {} notes from collection", notes.len());
    Ok(notes)
}
