//! XP, level, streak and badge bookkeeping.
//!
//! Everything here is pure: the service layer loads a [`UserGameState`],
//! calls [`apply_xp`], and writes the result back under a compare-and-set.

use crate::types::{ActionKind, Badge, BadgeId, EarnedBadge, UserGameState};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

const XP_BADGES: [(u64, BadgeId); 4] = [
    (100, BadgeId::FirstXp),
    (500, BadgeId::Xp500),
    (1000, BadgeId::Xp1000),
    (5000, BadgeId::Xp5000),
];

const LEVEL_BADGES: [(u32, BadgeId); 3] = [
    (5, BadgeId::Level5),
    (10, BadgeId::Level10),
    (25, BadgeId::Level25),
];

const STREAK_BADGES: [(u32, BadgeId); 2] = [(7, BadgeId::Streak7), (30, BadgeId::Streak30)];

/// Largest raw award a single action may request
pub const MAX_RAW_POINTS: u64 = 10_000;

/// Flashcard sessions earn a flat award, doubled when every card is correct
pub const FLASHCARD_SESSION_XP: u64 = 5;
pub const FLASHCARD_PERFECT_BONUS_XP: u64 = 5;

impl BadgeId {
    pub fn badge(&self) -> Badge {
        let (name, description) = match self {
            BadgeId::FirstXp => ("First XP", "Earned your first XP!"),
            BadgeId::Xp500 => ("XP Collector", "Reached 500 XP"),
            BadgeId::Xp1000 => ("XP Champion", "Reached 1000 XP"),
            BadgeId::Xp5000 => ("XP Legend", "Reached 5000 XP"),
            BadgeId::Level5 => ("Level 5", "Reached Level 5"),
            BadgeId::Level10 => ("Level 10", "Reached Level 10"),
            BadgeId::Level25 => ("Level 25", "Reached Level 25"),
            BadgeId::Streak7 => ("7-Day Streak", "7 days in a row!"),
            BadgeId::Streak30 => ("30-Day Streak", "30 days in a row!"),
        };
        Badge {
            id: *self,
            name: name.to_string(),
            description: description.to_string(),
            icon_url: format!("/badges/{}.svg", self.as_str()),
        }
    }
}

/// `floor(sqrt(total_xp / 100)) + 1`
pub fn calculate_level(total_xp: u64) -> u32 {
    (total_xp as f64 / 100.0).sqrt().floor() as u32 + 1
}

/// Multiply raw points by the action's multiplier, rounding half up
pub fn points_for(action: ActionKind, raw_points: u64) -> u64 {
    (raw_points as f64 * action.multiplier()).round() as u64
}

/// Every badge whose threshold is currently met, not only newly met ones
pub fn check_badge_thresholds(total_xp: u64, level: u32, streak: u32) -> BTreeSet<BadgeId> {
    let xp = XP_BADGES
        .iter()
        .filter(|(threshold, _)| total_xp >= *threshold)
        .map(|(_, id)| *id);
    let levels = LEVEL_BADGES
        .iter()
        .filter(|(threshold, _)| level >= *threshold)
        .map(|(_, id)| *id);
    let streaks = STREAK_BADGES
        .iter()
        .filter(|(threshold, _)| streak >= *threshold)
        .map(|(_, id)| *id);

    xp.chain(levels).chain(streaks).collect()
}

/// Streak after activity on `today`, given the previous active date
pub fn next_streak(streak: u32, last_active: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_active {
        Some(last) if last == today => streak,
        Some(last) if Some(last) == today.pred_opt() => streak + 1,
        _ => 1,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XpAward {
    pub points_awarded: u64,
    pub state: UserGameState,
    pub new_badges: Vec<EarnedBadge>,
}

/// Apply one XP-earning action.
///
/// Activity on the same day as `last_active_date` leaves the streak alone,
/// so repeated actions within a day credit the streak at most once.
pub fn apply_xp(
    state: &UserGameState,
    action: ActionKind,
    raw_points: u64,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> XpAward {
    let points_awarded = points_for(action, raw_points);
    let total_xp = state.total_xp.saturating_add(points_awarded);
    let streak = next_streak(state.streak, state.last_active_date, today);
    let level = calculate_level(total_xp);

    let mut earned_badges = state.earned_badges.clone();
    let mut new_badges = Vec::new();
    for id in check_badge_thresholds(total_xp, level, streak) {
        if !earned_badges.contains_key(&id) {
            earned_badges.insert(id, now);
            new_badges.push(EarnedBadge {
                badge: id.badge(),
                earned_at: now,
            });
        }
    }

    XpAward {
        points_awarded,
        state: UserGameState {
            total_xp,
            level,
            streak,
            last_active_date: Some(today),
            earned_badges,
        },
        new_badges,
    }
}

pub fn flashcard_session_xp(total_cards: u32, correct_count: u32) -> u64 {
    if total_cards > 0 && correct_count == total_cards {
        FLASHCARD_SESSION_XP + FLASHCARD_PERFECT_BONUS_XP
    } else {
        FLASHCARD_SESSION_XP
    }
}

/// 10 XP per half hour of accepted study time
pub fn study_session_xp(duration_minutes: u32, accepted: bool) -> u64 {
    if accepted {
        u64::from(duration_minutes / 3)
    } else {
        0
    }
}
