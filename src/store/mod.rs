use std::{collections::HashMap, path::Path, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use crate::core::{Course, StudyItem, TangoError, Topic, TopicGroup, UserProgress};

/// Items are flushed in bounded batches to keep one import transaction's
/// working set small.
pub const ITEM_BATCH_SIZE: usize = 1000;

// Caps how long a whole import transaction may sit on a locked database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(300);

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS courses (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  description TEXT,
  level TEXT NOT NULL DEFAULT 'Custom',
  owner_id INTEGER
);

CREATE TABLE IF NOT EXISTS topics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  course_id INTEGER NOT NULL,
  title TEXT NOT NULL,
  order_index INTEGER NOT NULL,
  FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS study_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  topic_id INTEGER NOT NULL,
  primary_text TEXT NOT NULL,
  secondary_text TEXT NOT NULL,
  meaning TEXT,
  image_url TEXT,
  audio_url TEXT,
  item_type TEXT NOT NULL DEFAULT 'VOCABULARY',
  extra_fields TEXT NOT NULL DEFAULT '{}',
  FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS user_progress (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL,
  study_item_id INTEGER NOT NULL,
  interval_days INTEGER NOT NULL DEFAULT 0,
  ease_factor REAL NOT NULL DEFAULT 2.5,
  streak INTEGER NOT NULL DEFAULT 0,
  last_reviewed TEXT,
  next_review TEXT NOT NULL,
  UNIQUE (user_id, study_item_id)
);

CREATE INDEX IF NOT EXISTS idx_courses_owner ON courses(owner_id);
CREATE INDEX IF NOT EXISTS idx_topics_course_order ON topics(course_id, order_index);
CREATE INDEX IF NOT EXISTS idx_study_items_topic ON study_items(topic_id);
CREATE INDEX IF NOT EXISTS idx_progress_user ON user_progress(user_id);
CREATE INDEX IF NOT EXISTS idx_progress_user_next ON user_progress(user_id, next_review);
";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, TangoError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, TangoError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, TangoError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Replaces any same-titled course owned by the same owner, then creates
    /// the course, its topics in grouped order with dense indexes, and its
    /// items in bounded batches. Everything runs in one transaction, so a
    /// failed batch also rolls the replacement delete back.
    pub fn import_course(
        &mut self,
        title: &str,
        description: Option<&str>,
        owner_id: Option<i64>,
        groups: &[TopicGroup],
    ) -> Result<(i64, usize, usize), TangoError> {
        let tx = self.conn.transaction()?;

        // Re-importing the same deck replaces, never merges.
        match owner_id {
            Some(owner) => tx.execute(
                "DELETE FROM courses WHERE title = ?1 AND owner_id = ?2",
                params![title, owner],
            )?,
            None => tx.execute(
                "DELETE FROM courses WHERE title = ?1 AND owner_id IS NULL",
                params![title],
            )?,
        };

        tx.execute(
            "INSERT INTO courses (title, description, level, owner_id) VALUES (?1, ?2, 'Custom', ?3)",
            params![title, description, owner_id],
        )?;
        let course_id = tx.last_insert_rowid();

        let mut items_created = 0usize;
        {
            let mut insert_item = tx.prepare_cached(
                "INSERT INTO study_items
                   (topic_id, primary_text, secondary_text, meaning, image_url, audio_url, item_type, extra_fields)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'VOCABULARY', ?7)",
            )?;

            for (order_index, group) in groups.iter().enumerate() {
                tx.execute(
                    "INSERT INTO topics (course_id, title, order_index) VALUES (?1, ?2, ?3)",
                    params![course_id, group.label, order_index as i64],
                )?;
                let topic_id = tx.last_insert_rowid();

                for batch in group.items.chunks(ITEM_BATCH_SIZE) {
                    for item in batch {
                        let extra = serde_json::to_string(&item.extra_fields)?;
                        insert_item.execute(params![
                            topic_id,
                            item.front,
                            item.reading,
                            item.back,
                            item.image_url,
                            item.audio_url,
                            extra,
                        ])?;
                    }
                    items_created += batch.len();
                    debug!("Flushed {} items for topic {}", batch.len(), group.label);
                }
            }
        }

        tx.commit()?;
        Ok((course_id, groups.len(), items_created))
    }

    pub fn course_by_title(
        &self,
        title: &str,
        owner_id: Option<i64>,
    ) -> Result<Option<Course>, TangoError> {
        let mut courses = self.courses_by_title(title, owner_id)?;
        Ok(if courses.is_empty() { None } else { Some(courses.remove(0)) })
    }

    pub fn courses_by_title(
        &self,
        title: &str,
        owner_id: Option<i64>,
    ) -> Result<Vec<Course>, TangoError> {
        let map = |row: &rusqlite::Row<'_>| {
            Ok(Course {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                level: row.get(3)?,
                owner_id: row.get(4)?,
            })
        };

        let mut courses = Vec::new();
        match owner_id {
            Some(owner) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, title, description, level, owner_id FROM courses
                     WHERE title = ?1 AND owner_id = ?2 ORDER BY id",
                )?;
                for course in stmt.query_map(params![title, owner], map)? {
                    courses.push(course?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, title, description, level, owner_id FROM courses
                     WHERE title = ?1 AND owner_id IS NULL ORDER BY id",
                )?;
                for course in stmt.query_map(params![title], map)? {
                    courses.push(course?);
                }
            }
        }
        Ok(courses)
    }

    pub fn topics_by_course(&self, course_id: i64) -> Result<Vec<Topic>, TangoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, course_id, title, order_index FROM topics
             WHERE course_id = ?1 ORDER BY order_index",
        )?;
        let rows = stmt.query_map(params![course_id], |row| {
            Ok(Topic {
                id: row.get(0)?,
                course_id: row.get(1)?,
                title: row.get(2)?,
                order_index: row.get(3)?,
            })
        })?;

        let mut topics = Vec::new();
        for topic in rows {
            topics.push(topic?);
        }
        Ok(topics)
    }

    pub fn items_by_topic(&self, topic_id: i64) -> Result<Vec<StudyItem>, TangoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, topic_id, primary_text, secondary_text, meaning, image_url, audio_url,
                    item_type, extra_fields
             FROM study_items WHERE topic_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![topic_id], |row| {
            Ok((
                StudyItem {
                    id: row.get(0)?,
                    topic_id: row.get(1)?,
                    primary_text: row.get(2)?,
                    secondary_text: row.get(3)?,
                    meaning: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    image_url: row.get(5)?,
                    audio_url: row.get(6)?,
                    item_type: row.get(7)?,
                    extra_fields: HashMap::new(),
                },
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (mut item, extra_json) = row?;
            item.extra_fields = serde_json::from_str(&extra_json)?;
            items.push(item);
        }
        Ok(items)
    }

    pub fn get_progress(
        &self,
        user_id: i64,
        study_item_id: i64,
    ) -> Result<Option<UserProgress>, TangoError> {
        let row: Option<(i64, u32, f64, u32, Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT id, interval_days, ease_factor, streak, last_reviewed, next_review
                 FROM user_progress WHERE user_id = ?1 AND study_item_id = ?2",
                params![user_id, study_item_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, interval_days, ease_factor, streak, last_reviewed, next_review)) => {
                Ok(Some(UserProgress {
                    id,
                    user_id,
                    study_item_id,
                    interval_days,
                    ease_factor: ease_factor as f32,
                    streak,
                    last_reviewed: last_reviewed.as_deref().map(parse_time).transpose()?,
                    next_review: parse_time(&next_review)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Inserts a new progress row (`id == 0`) or updates an existing one. An
    /// insert that loses the (user, item) uniqueness race surfaces as
    /// [`TangoError::SchedulerRace`] so the caller can retry against the row
    /// the winner created.
    pub fn save_progress(&mut self, progress: &UserProgress) -> Result<UserProgress, TangoError> {
        if progress.id == 0 {
            let inserted = self.conn.execute(
                "INSERT INTO user_progress
                   (user_id, study_item_id, interval_days, ease_factor, streak, last_reviewed, next_review)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    progress.user_id,
                    progress.study_item_id,
                    progress.interval_days,
                    progress.ease_factor as f64,
                    progress.streak,
                    progress.last_reviewed.as_ref().map(format_time),
                    format_time(&progress.next_review),
                ],
            );

            match inserted {
                Ok(_) => {
                    let mut saved = progress.clone();
                    saved.id = self.conn.last_insert_rowid();
                    Ok(saved)
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(TangoError::SchedulerRace)
                }
                Err(e) => Err(e.into()),
            }
        } else {
            self.conn.execute(
                "UPDATE user_progress
                 SET interval_days = ?1, ease_factor = ?2, streak = ?3, last_reviewed = ?4, next_review = ?5
                 WHERE id = ?6",
                params![
                    progress.interval_days,
                    progress.ease_factor as f64,
                    progress.streak,
                    progress.last_reviewed.as_ref().map(format_time),
                    format_time(&progress.next_review),
                    progress.id,
                ],
            )?;
            Ok(progress.clone())
        }
    }

    /// All of a user's progress rows due at `as_of`, soonest first.
    pub fn due_progress(
        &self,
        user_id: i64,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserProgress>, TangoError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, study_item_id, interval_days, ease_factor, streak, last_reviewed, next_review
             FROM user_progress
             WHERE user_id = ?1 AND next_review <= ?2
             ORDER BY next_review ASC",
        )?;
        let rows = stmt.query_map(params![user_id, format_time(&as_of)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut due = Vec::new();
        for row in rows {
            let (id, study_item_id, interval_days, ease_factor, streak, last_reviewed, next_review) =
                row?;
            due.push(UserProgress {
                id,
                user_id,
                study_item_id,
                interval_days,
                ease_factor: ease_factor as f32,
                streak,
                last_reviewed: last_reviewed.as_deref().map(parse_time).transpose()?,
                next_review: parse_time(&next_review)?,
            });
        }
        Ok(due)
    }
}

// Fixed-precision UTC timestamps keep lexicographic and chronological order
// in agreement for the due query.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, TangoError> {
    DateTime::parse_from_rfc3339(text)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| TangoError::Custom(format!("invalid stored timestamp {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use crate::core::NormalizedItem;

    use super::*;

    fn item(front: &str) -> NormalizedItem {
        NormalizedItem {
            front: front.to_string(),
            reading: "かな".to_string(),
            back: "meaning".to_string(),
            ..Default::default()
        }
    }

    fn groups(labels: &[(&str, usize)]) -> Vec<TopicGroup> {
        labels
            .iter()
            .map(|(label, count)| TopicGroup {
                label: label.to_string(),
                items: (0..*count).map(|i| item(&format!("word{i}"))).collect(),
            })
            .collect()
    }

    fn progress(user_id: i64, study_item_id: i64, next_review: DateTime<Utc>) -> UserProgress {
        UserProgress {
            id: 0,
            user_id,
            study_item_id,
            interval_days: 0,
            ease_factor: 2.5,
            streak: 0,
            last_reviewed: None,
            next_review,
        }
    }

    #[test]
    fn import_creates_dense_topic_order() {
        let mut store = Store::open_in_memory().unwrap();
        let (course_id, topics, items) = store
            .import_course("JLPT N5", Some("desc"), None, &groups(&[("Lesson 01", 2), ("Lesson 02", 1)]))
            .unwrap();

        assert_eq!(topics, 2);
        assert_eq!(items, 3);

        let stored = store.topics_by_course(course_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].title, "Lesson 01");
        assert_eq!(stored[0].order_index, 0);
        assert_eq!(stored[1].order_index, 1);

        let lesson_items = store.items_by_topic(stored[0].id).unwrap();
        assert_eq!(lesson_items.len(), 2);
        assert_eq!(lesson_items[0].primary_text, "word0");
        assert_eq!(lesson_items[0].item_type, "VOCABULARY");
    }

    #[test]
    fn reimport_replaces_course_for_same_owner() {
        let mut store = Store::open_in_memory().unwrap();
        store.import_course("Core 2k", None, Some(7), &groups(&[("Lesson 01", 3)])).unwrap();
        let (second_id, _, _) =
            store.import_course("Core 2k", None, Some(7), &groups(&[("Lesson 01", 2)])).unwrap();

        let courses = store.courses_by_title("Core 2k", Some(7)).unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, second_id);

        let topics = store.topics_by_course(second_id).unwrap();
        assert_eq!(store.items_by_topic(topics[0].id).unwrap().len(), 2);
    }

    #[test]
    fn same_title_different_owner_is_kept() {
        let mut store = Store::open_in_memory().unwrap();
        store.import_course("Core 2k", None, Some(1), &groups(&[("Lesson 01", 1)])).unwrap();
        store.import_course("Core 2k", None, Some(2), &groups(&[("Lesson 01", 1)])).unwrap();

        assert_eq!(store.courses_by_title("Core 2k", Some(1)).unwrap().len(), 1);
        assert_eq!(store.courses_by_title("Core 2k", Some(2)).unwrap().len(), 1);
    }

    #[test]
    fn extra_fields_round_trip_as_json() {
        let mut store = Store::open_in_memory().unwrap();
        let mut with_extras = item("猫");
        with_extras.extra_fields.insert("Notes".to_string(), "a common pet".to_string());
        let groups = vec![TopicGroup { label: "Lesson 01".to_string(), items: vec![with_extras] }];

        let (course_id, _, _) = store.import_course("Pets", None, None, &groups).unwrap();
        let topics = store.topics_by_course(course_id).unwrap();
        let items = store.items_by_topic(topics[0].id).unwrap();
        assert_eq!(items[0].extra_fields["Notes"], "a common pet");
    }

    #[test]
    fn duplicate_progress_insert_reports_race() {
        let mut store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.save_progress(&progress(1, 10, now)).unwrap();

        let err = store.save_progress(&progress(1, 10, now)).unwrap_err();
        assert_eq!(err.kind(), "scheduler_race");
    }

    #[test]
    fn due_query_excludes_future_and_sorts_ascending() {
        let mut store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.save_progress(&progress(1, 10, now - ChronoDuration::days(2))).unwrap();
        store.save_progress(&progress(1, 11, now - ChronoDuration::days(5))).unwrap();
        store.save_progress(&progress(1, 12, now + ChronoDuration::seconds(1))).unwrap();
        store.save_progress(&progress(2, 10, now - ChronoDuration::days(9))).unwrap();

        let due = store.due_progress(1, now).unwrap();
        let due_items: Vec<i64> = due.iter().map(|p| p.study_item_id).collect();
        assert_eq!(due_items, vec![11, 10]);
    }
}
