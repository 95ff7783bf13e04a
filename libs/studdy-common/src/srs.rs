//! SM-2 spaced-repetition scheduling.
//!
//! `next_interval` is the classical SuperMemo-2 update and must keep the
//! exact arithmetic below: users see the resulting review dates.

use crate::types::ReviewState;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const MIN_EASE_FACTOR: f64 = 1.3;
pub const INITIAL_EASE_FACTOR: f64 = 2.5;

/// Reviews scheduled within this many days count as upcoming
pub const UPCOMING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sm2Outcome {
    pub interval_days: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
}

/// Compute the next interval from recall quality.
///
/// `quality` is expected in `0..=5`; keeping it there is the caller's job.
/// Quality below 3 is a failed recall and restarts the chain.
pub fn next_interval(ease_factor: f64, repetitions: u32, quality: u8) -> Sm2Outcome {
    let miss = 5.0 - f64::from(quality);
    let ease = (ease_factor + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE_FACTOR);

    if quality < 3 {
        return Sm2Outcome {
            interval_days: 1,
            ease_factor: ease,
            repetitions: 0,
        };
    }

    let interval_days = match repetitions {
        0 => 1,
        1 => 6,
        n => (f64::from(n) * ease).round() as u32,
    };

    Sm2Outcome {
        interval_days,
        ease_factor: ease,
        repetitions: repetitions + 1,
    }
}

impl ReviewState {
    /// Fresh state for a concept, due immediately
    pub fn new(concept_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            concept_id: concept_id.into(),
            ease_factor: INITIAL_EASE_FACTOR,
            repetitions: 0,
            interval_days: 1,
            scheduled_for: now,
            last_reviewed_at: None,
        }
    }

    /// The state that supersedes this one after a review of `quality`
    pub fn review(&self, quality: u8, now: DateTime<Utc>) -> Self {
        let outcome = next_interval(self.ease_factor, self.repetitions, quality);
        Self {
            concept_id: self.concept_id.clone(),
            ease_factor: outcome.ease_factor,
            repetitions: outcome.repetitions,
            interval_days: outcome.interval_days,
            scheduled_for: now + Duration::days(i64::from(outcome.interval_days)),
            last_reviewed_at: Some(now),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSchedule {
    pub due_reviews: Vec<ReviewState>,
    pub upcoming_reviews: Vec<ReviewState>,
}

/// Split reviews into due now and due within the upcoming window, each
/// ordered oldest first. Reviews further out are dropped.
pub fn partition_reviews(reviews: Vec<ReviewState>, now: DateTime<Utc>) -> ReviewSchedule {
    let horizon = now + Duration::days(UPCOMING_WINDOW_DAYS);
    let (mut due, rest): (Vec<_>, Vec<_>) = reviews.into_iter().partition(|r| r.is_due(now));
    let mut upcoming: Vec<_> = rest
        .into_iter()
        .filter(|r| r.scheduled_for <= horizon)
        .collect();

    due.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for));
    upcoming.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for));

    ReviewSchedule {
        due_reviews: due,
        upcoming_reviews: upcoming,
    }
}
