use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub level: String,            // e.g., "Custom", "N5"
    pub owner_id: Option<i64>,    // None for shared/seeded courses
}

#[derive(Debug, Clone)]
pub struct Topic {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub order_index: i64,         // Dense, ascending within a course
}

#[derive(Debug, Clone)]
pub struct StudyItem {
    pub id: i64,
    pub topic_id: i64,
    pub primary_text: String,
    pub secondary_text: String,
    pub meaning: String,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub item_type: String,        // VOCABULARY, KANJI, GRAMMAR
    pub extra_fields: HashMap<String, String>,
}

/// One cleaned card produced by the normalizer, before persistence.
#[derive(Debug, Clone, Default)]
pub struct NormalizedItem {
    pub front: String,
    pub reading: String,
    pub back: String,
    pub topic_label: String,
    pub extra_fields: HashMap<String, String>,
    pub audio_refs: Vec<String>,  // Original filenames from [sound:...]
    pub image_refs: Vec<String>,  // Original filenames from <img src="...">
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TopicGroup {
    pub label: String,
    pub items: Vec<NormalizedItem>,
}

#[derive(Debug, Clone)]
pub struct UserProgress {
    pub id: i64,
    pub user_id: i64,
    pub study_item_id: i64,
    pub interval_days: u32,
    pub ease_factor: f32,
    pub streak: u32,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub next_review: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub course_id: i64,
    pub course_name: String,
    pub topics_created: usize,
    pub items_created: usize,
    pub items_skipped: usize,
    pub warnings: Vec<String>,
}
