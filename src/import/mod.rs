use std::{
    collections::HashMap,
    sync::OnceLock,
};

use regex::Regex;
use tracing::info;

use crate::{
    core::{ImportSummary, NormalizedItem, TangoError, TopicGroup},
    media::{self, MediaStore},
    store::Store,
};

pub mod archive;
pub mod collection;
pub mod normalize;
pub mod notes;

const DEFAULT_COURSE_NAME: &str = "Imported Course";
const COURSE_DESCRIPTION: &str = "Imported from Anki deck";

/// Runs the whole deck import for one uploaded `.apkg`: extract, locate the
/// collection, read and normalize notes, relocate media, group into topics,
/// and persist as one replace-semantics transaction. The extraction
/// workspace is removed on every exit path.
pub fn import_apkg(
    store: &mut Store,
    media_store: Option<&MediaStore>,
    bytes: &[u8],
    filename: &str,
    owner_id: Option<i64>,
) -> Result<ImportSummary, TangoError> {
    let workspace = archive::extract_archive(bytes)?;
    let collection = collection::locate_collection(workspace.path())?;

    let conn = notes::open_collection(&collection)?;
    let field_names = notes::read_field_names(&conn);
    let raw_notes = notes::read_notes(&conn)?;
    drop(conn);

    let mut normalized = normalize::normalize_notes(&raw_notes, &field_names);
    if normalized.items.is_empty() {
        return Err(TangoError::NoImportableContent {
            skipped: normalized.skipped,
            warnings: normalized.warnings,
        });
    }

    if let Some(media_store) = media_store {
        let manifest = media::parse_manifest(workspace.path());
        if !manifest.is_empty() {
            let urls = media_store.relocate(workspace.path(), &manifest)?;
            media::resolve_references(&mut normalized.items, &urls);
        }
    }

    let course_name = course_name_from(filename);
    let groups = group_by_topic(normalized.items);

    let (course_id, topics_created, items_created) =
        store.import_course(&course_name, Some(COURSE_DESCRIPTION), owner_id, &groups)?;

    info!(
        "Imported {} items into {} topics for {}",
        items_created, topics_created, course_name
    );

    Ok(ImportSummary {
        course_id,
        course_name,
        topics_created,
        items_created,
        items_skipped: normalized.skipped,
        warnings: normalized.warnings,
    })
}

fn course_name_from(filename: &str) -> String {
    let name = filename.replace(".apkg", "");
    let name = name.trim();
    if name.is_empty() {
        DEFAULT_COURSE_NAME.to_string()
    } else {
        name.to_string()
    }
}

fn digit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

// First digit run decides the order; labels without one sort last.
fn topic_sort_key(label: &str) -> (u32, String) {
    let number = digit_re()
        .find(label)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u32::MAX);
    (number, label.to_lowercase())
}

/// Groups items by topic label, ordered numerically by the first digit run
/// in the label with a case-insensitive lexicographic tiebreak, so
/// "Lesson 2" precedes "Lesson 10".
pub fn group_by_topic(items: Vec<NormalizedItem>) -> Vec<TopicGroup> {
    let mut groups: Vec<TopicGroup> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for item in items {
        let label = item.topic_label.clone();
        let slot = *slots.entry(label.clone()).or_insert_with(|| {
            groups.push(TopicGroup { label, items: Vec::new() });
            groups.len() - 1
        });
        groups[slot].items.push(item);
    }

    groups.sort_by(|a, b| topic_sort_key(&a.label).cmp(&topic_sort_key(&b.label)));
    groups
}
