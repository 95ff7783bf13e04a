use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Languages the judge can run, with their fixed judge identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
    Go,
    Rust,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Cpp,
        Language::Go,
        Language::Rust,
    ];

    /// Numeric identifier the judge uses for this language
    pub fn judge_id(&self) -> u32 {
        match self {
            Language::Python => 71,
            Language::JavaScript => 63,
            Language::Java => 62,
            Language::Cpp => 54,
            Language::Go => 60,
            Language::Rust => 73,
        }
    }
}

/// Parse a user supplied language name (trimmed, case-insensitive)
impl FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "cpp" => Ok(Language::Cpp),
            "go" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            _ => Err(AppError::unsupported_language(s)
                .with_suggestion("Supported languages: python, javascript, java, cpp, go, rust")),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
        };
        write!(f, "{}", name)
    }
}

/// Payload submitted to the judge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

/// Normalized outcome of a terminal judge submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    pub status_description: String,
}

/// A single input/expected-output pair for solution evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case_id: String,
    pub passed: bool,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
}

/// SM-2 scheduling state for one user and concept
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    pub concept_id: String,
    pub ease_factor: f64,
    pub repetitions: u32,
    pub interval_days: u32,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

/// XP earning actions, each with a fixed multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ExerciseComplete,
    QuizComplete,
    StreakBonus,
    Milestone,
}

impl ActionKind {
    pub fn multiplier(&self) -> f64 {
        match self {
            ActionKind::ExerciseComplete => 1.0,
            ActionKind::QuizComplete => 1.5,
            ActionKind::StreakBonus => 0.5,
            ActionKind::Milestone => 2.0,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::ExerciseComplete => "exercise_complete",
            ActionKind::QuizComplete => "quiz_complete",
            ActionKind::StreakBonus => "streak_bonus",
            ActionKind::Milestone => "milestone",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BadgeId {
    #[serde(rename = "first_xp")]
    FirstXp,
    #[serde(rename = "xp_500")]
    Xp500,
    #[serde(rename = "xp_1000")]
    Xp1000,
    #[serde(rename = "xp_5000")]
    Xp5000,
    #[serde(rename = "level_5")]
    Level5,
    #[serde(rename = "level_10")]
    Level10,
    #[serde(rename = "level_25")]
    Level25,
    #[serde(rename = "streak_7")]
    Streak7,
    #[serde(rename = "streak_30")]
    Streak30,
}

impl BadgeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeId::FirstXp => "first_xp",
            BadgeId::Xp500 => "xp_500",
            BadgeId::Xp1000 => "xp_1000",
            BadgeId::Xp5000 => "xp_5000",
            BadgeId::Level5 => "level_5",
            BadgeId::Level10 => "level_10",
            BadgeId::Level25 => "level_25",
            BadgeId::Streak7 => "streak_7",
            BadgeId::Streak30 => "streak_30",
        }
    }
}

/// Immutable badge catalog entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: BadgeId,
    pub name: String,
    pub description: String,
    pub icon_url: String,
}

/// A badge together with the moment it was first unlocked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EarnedBadge {
    #[serde(flatten)]
    pub badge: Badge,
    pub earned_at: DateTime<Utc>,
}

/// Per-user gamification record. `level` is derived from `total_xp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserGameState {
    pub total_xp: u64,
    pub level: u32,
    pub streak: u32,
    #[serde(default)]
    pub last_active_date: Option<NaiveDate>,
    #[serde(default)]
    pub earned_badges: BTreeMap<BadgeId, DateTime<Utc>>,
}

impl Default for UserGameState {
    fn default() -> Self {
        Self {
            total_xp: 0,
            level: 1,
            streak: 0,
            last_active_date: None,
            earned_badges: BTreeMap::new(),
        }
    }
}

/// Append-only record of an XP award
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XpHistoryEntry {
    pub action: ActionKind,
    pub points: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
