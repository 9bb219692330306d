//! Domain models: courses, chapters, generated questions, learner answers,
//! unlock/progress records, the points ledger and achievements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-(user, chapter) unlock state. Chapter 1 is unlocked at enrollment;
/// chapter N+1 unlocks only after chapter N completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChapterStatus {
  Locked,
  Unlocked,
  Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
  InProgress,
  Completed,
}

/// Reason codes recorded in the points ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointsReason {
  ChapterCompletion,
  StreakBonus,
  AchievementUnlock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
  pub id: String,
  pub title: String,
  pub description: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
  pub id: String,
  pub course_id: String,
  pub chapter_number: u32,
  pub title: String,
  pub description: String,
  /// Markdown body, generated lazily by the content collaborator.
  #[serde(default)]
  pub content_md: Option<String>,
}

/// One generated comprehension question. Immutable once stored; regeneration
/// replaces the whole set for a chapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterQuestion {
  pub id: String,
  pub chapter_id: String,
  pub question_number: u32,
  pub question_text: String,
  pub question_type: String,
  pub question_category: String,
  pub difficulty: String,
  #[serde(default)]
  pub hints: Vec<String>,
  #[serde(default)]
  pub options: Option<Vec<String>>,
}

/// A learner's answer to one question, unique per (user, question).
/// Resubmission overwrites the text and clears any prior evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuestionAnswer {
  pub user_id: String,
  pub question_id: String,
  pub answer: String,
  pub ai_score: Option<u32>,
  pub is_correct: Option<bool>,
  pub ai_feedback: Option<String>,
  #[serde(default)]
  pub ai_suggestions: Vec<String>,
  pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChapterProgress {
  pub user_id: String,
  pub course_id: String,
  pub chapter_id: String,
  pub status: ChapterStatus,
  pub unlocked_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCourseProgress {
  pub user_id: String,
  pub course_id: String,
  pub status: CourseStatus,
  pub started_at: DateTime<Utc>,
}

/// Aggregate points state. Invariant after every update:
/// `current_exp < exp_to_next_level` and `level` never decreases.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPoints {
  pub user_id: String,
  pub total_points: i64,
  pub level: u32,
  pub current_exp: i64,
  pub exp_to_next_level: i64,
  pub streak: u32,
  pub last_active_date: Option<DateTime<Utc>>,
}

impl UserPoints {
  pub fn fresh(user_id: &str) -> Self {
    Self {
      user_id: user_id.to_string(),
      total_points: 0,
      level: 1,
      current_exp: 0,
      exp_to_next_level: 100,
      streak: 0,
      last_active_date: None,
    }
  }
}

/// Append-only ledger row; never mutated or deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsHistoryEntry {
  pub id: String,
  pub user_id: String,
  pub points_change: i64,
  pub reason: PointsReason,
  pub description: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Outcome record of one progression submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
  pub id: String,
  pub user_id: String,
  pub course_id: String,
  pub chapter_id: String,
  pub score: u32,
  pub can_progress: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
  Course,
  Chapter,
  Points,
  Level,
  Mastery,
  Streak,
}

/// Unlock conditions checked against aggregate learner stats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AchievementCondition {
  CompleteCourses(u32),
  CompleteChapters(u32),
  EarnPoints(i64),
  ReachLevel(u32),
  PerfectScores(u32),
  StreakDays(u32),
}

#[derive(Clone, Debug)]
pub struct AchievementDef {
  pub id: &'static str,
  pub name: &'static str,
  pub description: &'static str,
  pub icon: &'static str,
  pub category: AchievementCategory,
  pub condition: AchievementCondition,
  pub points: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
  pub user_id: String,
  pub achievement_id: String,
  pub unlocked_at: DateTime<Utc>,
}
