//! Public request/response DTOs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
  Assessment, Chapter, ChapterQuestion, Course, PointsHistoryEntry, UserChapterProgress,
  UserCourseProgress, UserPoints, UserQuestionAnswer,
};

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}

//
// Courses
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterOutlineIn {
  pub title: String,
  pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseIn {
  pub title: String,
  pub description: String,
  pub chapters: Vec<ChapterOutlineIn>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOut {
  #[serde(flatten)]
  pub course: Course,
  pub chapters: Vec<Chapter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIn {
  pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
  pub user_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressOut {
  pub course: UserCourseProgress,
  pub chapters: Vec<UserChapterProgress>,
}

//
// Questions & answers
//

/// A question bundled with the requesting user's latest answer, if any.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionWithAnswerOut {
  #[serde(flatten)]
  pub question: ChapterQuestion,
  pub user_answer: Option<UserQuestionAnswer>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsOut {
  pub chapter_id: String,
  pub source: &'static str,
  pub questions: Vec<QuestionWithAnswerOut>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerIn {
  pub user_id: String,
  pub question_id: String,
  pub answer: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerOut {
  #[serde(flatten)]
  pub answer: UserQuestionAnswer,
}

//
// Progression
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateIn {
  pub user_id: String,
  pub chapter_id: String,
  /// questionId -> free-text answer.
  pub answers: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResultOut {
  pub question_id: String,
  pub question_text: String,
  pub user_answer: String,
  pub score: u32,
  pub feedback: String,
  pub is_correct: bool,
  pub suggestions: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentOut {
  pub can_progress: bool,
  pub total_score: u32,
  pub points_earned: i64,
  pub feedback: String,
  pub evaluation_results: Vec<EvaluationResultOut>,
}

//
// Content generation
//

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentIn {
  #[serde(default)]
  pub regenerate: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentOut {
  pub chapter_id: String,
  pub content_md: String,
}

//
// Points
//

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsOut {
  #[serde(flatten)]
  pub points: UserPoints,
  pub recent_history: Vec<PointsHistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
  pub user_id: String,
  pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOut {
  pub history: Vec<PointsHistoryEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakOut {
  pub streak: u32,
  pub bonus_points: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
  /// "points" (default) or "level".
  pub by: Option<String>,
  pub limit: Option<usize>,
  pub user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardOut {
  pub leaderboard: Vec<UserPoints>,
  pub user_rank: Option<usize>,
}

//
// Achievements & assessments
//

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementOut {
  pub id: &'static str,
  pub name: &'static str,
  pub description: &'static str,
  pub icon: &'static str,
  pub category: crate::domain::AchievementCategory,
  pub points: i64,
  pub is_unlocked: bool,
  pub unlocked_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentsQuery {
  pub user_id: String,
  pub chapter_id: Option<String>,
  pub course_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentsOut {
  pub assessments: Vec<Assessment>,
}
