use std::{
    collections::HashMap,
    sync::OnceLock,
};

use regex::Regex;
use tracing::debug;

use crate::core::NormalizedItem;

use super::notes::{RawNote, FIELD_SEPARATOR};

pub const MAX_FRONT_LENGTH: usize = 500;
pub const MAX_READING_LENGTH: usize = 500;
pub const MAX_BACK_LENGTH: usize = 1000;

/// Notes are bucketed into fixed-size lessons in import order, independent
/// of any deck metadata the archive carries.
pub const ITEMS_PER_LESSON: usize = 20;

const UPDATE_PLACEHOLDER: &str = "Please update to the latest Anki version";
const WARN_TRUNCATION: &str = "Some text was truncated to fit database limits";
const EMPTY_PLACEHOLDER: &str = "-";

const PRIMARY_FIELDS: [&str; 3] = ["Expression", "Kanji", "Front"];
const SECONDARY_FIELDS: [&str; 3] = ["Reading", "Kana", "Furigana"];
const MEANING_FIELDS: [&str; 3] = ["Meaning", "English", "Back"];

#[derive(Debug, Default)]
pub struct NormalizeResult {
    pub items: Vec<NormalizedItem>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

fn sound_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[sound:([^\]]+)\]").unwrap())
}

fn img_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<img[^>]+>").unwrap())
}

fn img_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<img[^>]*src=["']?([^"'>\s]+)["']?"#).unwrap())
}

fn play_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[anki:play:[^\]]+\]").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Strips media markup and HTML tags, decodes the standard entities, and
/// collapses whitespace. Tags are removed before entities are decoded, so
/// markup that was entity-escaped in the source survives as literal text.
pub fn clean_field(text: &str) -> String {
    let text = sound_re().replace_all(text, "");
    let text = img_re().replace_all(&text, "");
    let text = play_re().replace_all(&text, "");
    let text = tag_re().replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"");
    whitespace_re().replace_all(&text, " ").trim().to_string()
}

fn collect_media_refs(raw: &str, audio: &mut Vec<String>, images: &mut Vec<String>) {
    for cap in sound_re().captures_iter(raw) {
        audio.push(cap[1].to_string());
    }
    for cap in img_src_re().captures_iter(raw) {
        images.push(cap[1].to_string());
    }
}

fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    if text.chars().count() <= max {
        (text.to_string(), false)
    } else {
        (text.chars().take(max).collect(), true)
    }
}

fn named_value(fields: &HashMap<String, String>, preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|name| fields.get(*name).cloned())
}

/// Converts raw notes into normalized items: cleaned named fields, the three
/// canonical slots, media references, and a lesson bucket label. Returns the
/// surviving items plus skip and warning detail.
pub fn normalize_notes(notes: &[RawNote], field_names: &[String]) -> NormalizeResult {
    let mut result = NormalizeResult::default();

    for note in notes {
        if note.fields.trim().is_empty() || note.fields.contains(UPDATE_PLACEHOLDER) {
            result.skipped += 1;
            continue;
        }

        let parts: Vec<&str> = note.fields.split(FIELD_SEPARATOR).collect();
        let cleaned: Vec<String> = parts.iter().map(|part| clean_field(part)).collect();

        let raw_front =
            cleaned.iter().find(|value| !value.is_empty()).cloned().unwrap_or_default();
        let raw_reading = cleaned.get(1).cloned().unwrap_or_default();
        let raw_meaning = cleaned.get(2).cloned().unwrap_or_default();

        if raw_front.is_empty() && raw_meaning.is_empty() {
            result.skipped += 1;
            continue;
        }

        let mut extra_fields = HashMap::new();
        for (i, value) in cleaned.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let name =
                field_names.get(i).cloned().unwrap_or_else(|| format!("Field{}", i + 1));
            extra_fields.insert(name, value.clone());
        }

        let primary = named_value(&extra_fields, &PRIMARY_FIELDS).unwrap_or_else(|| {
            if raw_front.is_empty() { EMPTY_PLACEHOLDER.to_string() } else { raw_front.clone() }
        });
        let secondary = named_value(&extra_fields, &SECONDARY_FIELDS).unwrap_or_else(|| {
            if raw_reading.is_empty() { primary.clone() } else { raw_reading.clone() }
        });
        let meaning = named_value(&extra_fields, &MEANING_FIELDS).unwrap_or_else(|| {
            if raw_meaning.is_empty() { EMPTY_PLACEHOLDER.to_string() } else { raw_meaning }
        });

        let (front, front_cut) = truncate_chars(&primary, MAX_FRONT_LENGTH);
        let (reading, reading_cut) = truncate_chars(&secondary, MAX_READING_LENGTH);
        let (back, back_cut) = truncate_chars(&meaning, MAX_BACK_LENGTH);

        if front_cut || reading_cut || back_cut {
            let warning = WARN_TRUNCATION.to_string();
            if !result.warnings.contains(&warning) {
                result.warnings.push(warning);
            }
        }

        let mut audio_refs = Vec::new();
        let mut image_refs = Vec::new();
        collect_media_refs(&note.fields, &mut audio_refs, &mut image_refs);

        let topic_label =
            format!("Lesson {:02}", result.items.len() / ITEMS_PER_LESSON + 1);

        result.items.push(NormalizedItem {
            front,
            reading,
            back,
            topic_label,
            extra_fields,
            audio_refs,
            image_refs,
            audio_url: None,
            image_url: None,
        });
    }

    debug!("Parsed {} cards, skipped {}", result.items.len(), result.skipped);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: i64, fields: &str) -> RawNote {
        RawNote { id, fields: fields.to_string() }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn decodes_entities_without_stripping_decoded_tags() {
        assert_eq!(clean_field("&lt;b&gt;漢字&lt;/b&gt; &nbsp; test"), "<b>漢字</b> test");
    }

    #[test]
    fn strips_markup_and_collapses_whitespace() {
        assert_eq!(
            clean_field("<b>ねこ</b>  [sound:neko.mp3]<img src=\"cat.jpg\">  cat"),
            "ねこ cat"
        );
        assert_eq!(clean_field("[anki:play:q:0]  回る\n\n  "), "回る");
    }

    #[test]
    fn maps_slots_by_field_name_with_fallbacks() {
        let field_names = names(&["Expression", "Reading", "Meaning", "Notes"]);
        let result = normalize_notes(
            &[note(1, "猫\u{1f}ねこ\u{1f}cat\u{1f}a common pet")],
            &field_names,
        );

        assert_eq!(result.items.len(), 1);
        let item = &result.items[0];
        assert_eq!(item.front, "猫");
        assert_eq!(item.reading, "ねこ");
        assert_eq!(item.back, "cat");
        assert_eq!(item.extra_fields["Notes"], "a common pet");
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn positional_fallback_when_names_are_unknown() {
        let result = normalize_notes(&[note(1, "走る\u{1f}はしる\u{1f}to run")], &[]);

        let item = &result.items[0];
        assert_eq!(item.front, "走る");
        assert_eq!(item.reading, "はしる");
        assert_eq!(item.back, "to run");
        // Synthetic names cover decks without usable note-type metadata.
        assert_eq!(item.extra_fields["Field1"], "走る");
        assert_eq!(item.extra_fields["Field3"], "to run");
    }

    #[test]
    fn reading_falls_back_to_primary() {
        let result = normalize_notes(&[note(1, "木")], &[]);
        let item = &result.items[0];
        assert_eq!(item.front, "木");
        assert_eq!(item.reading, "木");
        assert_eq!(item.back, "-");
    }

    #[test]
    fn skips_blank_placeholder_and_empty_notes() {
        let notes = [
            note(1, "   "),
            note(2, "Please update to the latest Anki version to view this card"),
            note(3, "[sound:only.mp3]\u{1f}<img src=\"only.jpg\">"),
            note(4, "犬\u{1f}いぬ\u{1f}dog"),
        ];
        let result = normalize_notes(&notes, &[]);

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].front, "犬");
        assert_eq!(result.skipped, 3);
    }

    #[test]
    fn truncates_to_char_limits_with_one_warning() {
        let long_front = "あ".repeat(600);
        let long_back = "b".repeat(1200);
        let payload = format!("{}\u{1f}よみ\u{1f}{}", long_front, long_back);
        let result = normalize_notes(&[note(1, &payload)], &[]);

        let item = &result.items[0];
        assert_eq!(item.front.chars().count(), MAX_FRONT_LENGTH);
        assert_eq!(item.back.chars().count(), MAX_BACK_LENGTH);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn buckets_twenty_items_per_lesson() {
        let notes: Vec<RawNote> =
            (0..45).map(|i| note(i, &format!("word{}\u{1f}かな\u{1f}meaning", i))).collect();
        let result = normalize_notes(&notes, &[]);

        assert_eq!(result.items[0].topic_label, "Lesson 01");
        assert_eq!(result.items[19].topic_label, "Lesson 01");
        assert_eq!(result.items[20].topic_label, "Lesson 02");
        assert_eq!(result.items[44].topic_label, "Lesson 03");
    }

    #[test]
    fn collects_media_references_before_cleaning() {
        let result =
            normalize_notes(&[note(1, "猫[sound:neko.mp3]\u{1f}ねこ\u{1f}<img src='cat.jpg'> cat")], &[]);

        let item = &result.items[0];
        assert_eq!(item.audio_refs, vec!["neko.mp3"]);
        assert_eq!(item.image_refs, vec!["cat.jpg"]);
    }
}
