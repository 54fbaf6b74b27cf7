use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    core::{TangoError, UserProgress},
    store::Store,
};

pub const INITIAL_EASE_FACTOR: f32 = 2.5;
pub const MIN_EASE_FACTOR: f32 = 1.3;
const EASE_PENALTY: f32 = 0.2;

fn initial_progress(user_id: i64, study_item_id: i64, now: DateTime<Utc>) -> UserProgress {
    UserProgress {
        id: 0,
        user_id,
        study_item_id,
        interval_days: 0,
        ease_factor: INITIAL_EASE_FACTOR,
        streak: 0,
        last_reviewed: None,
        next_review: now,
    }
}

/// Applies one review outcome to a progress record. Correct answers walk the
/// interval 0 -> 1 -> 3 and then multiply by the ease factor; a miss resets
/// the interval to one day and lowers the ease factor, never below the
/// floor. The ease factor never rises.
pub fn advance(progress: &mut UserProgress, correct: bool, now: DateTime<Utc>) {
    if correct {
        progress.streak += 1;
        let interval = match progress.interval_days {
            0 => 1,
            1 => 3,
            days => (days as f32 * progress.ease_factor).round() as u32,
        };
        progress.interval_days = interval;
        progress.next_review = now + Duration::days(interval as i64);
    } else {
        progress.streak = 0;
        progress.interval_days = 1;
        progress.next_review = now + Duration::days(1);
        progress.ease_factor = (progress.ease_factor - EASE_PENALTY).max(MIN_EASE_FACTOR);
    }
    progress.last_reviewed = Some(now);
}

/// Records one review for (user, item). The progress row is created lazily
/// on first review; a creation that loses the uniqueness race to a
/// concurrent submission is retried once against the row the winner
/// created, then surfaces as a transient error.
pub fn record_review(
    store: &mut Store,
    user_id: i64,
    study_item_id: i64,
    correct: bool,
) -> Result<UserProgress, TangoError> {
    let now = Utc::now();

    for attempt in 0..2 {
        let mut progress = match store.get_progress(user_id, study_item_id)? {
            Some(existing) => existing,
            None => initial_progress(user_id, study_item_id, now),
        };
        advance(&mut progress, correct, now);

        match store.save_progress(&progress) {
            Ok(saved) => return Ok(saved),
            Err(TangoError::SchedulerRace) if attempt == 0 => {
                debug!(
                    "Progress insert raced for user {} item {}, retrying",
                    user_id, study_item_id
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(TangoError::SchedulerRace)
}

/// A user's due progress rows at `as_of`, soonest first.
pub fn due_items(
    store: &Store,
    user_id: i64,
    as_of: DateTime<Utc>,
) -> Result<Vec<UserProgress>, TangoError> {
    store.due_progress(user_id, as_of)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_reviews_walk_one_three_then_ease_multiplied() {
        let now = Utc::now();
        let mut progress = initial_progress(1, 1, now);

        advance(&mut progress, true, now);
        assert_eq!(progress.interval_days, 1);
        assert_eq!(progress.streak, 1);
        assert_eq!(progress.next_review, now + Duration::days(1));

        advance(&mut progress, true, now);
        assert_eq!(progress.interval_days, 3);
        assert_eq!(progress.streak, 2);

        // round(3 * 2.5) = 8
        advance(&mut progress, true, now);
        assert_eq!(progress.interval_days, 8);
        assert_eq!(progress.next_review, now + Duration::days(8));
        assert_eq!(progress.last_reviewed, Some(now));
    }

    #[test]
    fn incorrect_review_resets_interval_and_lowers_ease() {
        let now = Utc::now();
        let mut progress = initial_progress(1, 1, now);
        for _ in 0..3 {
            advance(&mut progress, true, now);
        }

        advance(&mut progress, false, now);
        assert_eq!(progress.interval_days, 1);
        assert_eq!(progress.streak, 0);
        assert!((progress.ease_factor - 2.3).abs() < 1e-6);
        assert_eq!(progress.next_review, now + Duration::days(1));
    }

    #[test]
    fn ease_factor_never_drops_below_floor() {
        let now = Utc::now();
        let mut progress = initial_progress(1, 1, now);
        for _ in 0..20 {
            advance(&mut progress, false, now);
        }
        assert!((progress.ease_factor - MIN_EASE_FACTOR).abs() < 1e-6);
    }

    #[test]
    fn record_review_creates_then_updates_one_row() {
        let mut store = Store::open_in_memory().unwrap();

        let first = record_review(&mut store, 1, 42, true).unwrap();
        assert!(first.id > 0);
        assert_eq!(first.interval_days, 1);

        let second = record_review(&mut store, 1, 42, true).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.interval_days, 3);

        let third = record_review(&mut store, 1, 42, false).unwrap();
        assert_eq!(third.id, first.id);
        assert_eq!(third.interval_days, 1);
        assert_eq!(third.streak, 0);
    }

    #[test]
    fn due_items_come_back_sorted_by_next_review() {
        let mut store = Store::open_in_memory().unwrap();
        record_review(&mut store, 1, 10, true).unwrap();
        record_review(&mut store, 1, 11, true).unwrap();

        // Both are one day out; nothing is due yet.
        assert!(due_items(&store, 1, Utc::now()).unwrap().is_empty());

        let due = due_items(&store, 1, Utc::now() + Duration::days(2)).unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].next_review <= due[1].next_review);
    }
}
