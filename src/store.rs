//! In-memory persistence collaborator.
//!
//! This module owns every stored entity behind `tokio::sync::RwLock` maps:
//! courses/chapters, generated question sets, learner answers (unique per
//! user+question), normalized per-(user, chapter) unlock rows, course
//! enrollment, the points ledger and achievement unlocks.
//!
//! Unlock transitions are expressed as single upserts keyed by the unique
//! (user, chapter) pair, so concurrent progression attempts serialize on the
//! row rather than racing a read-modify-write in handler code.

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ai::AnswerEvaluation;
use crate::domain::*;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

type UserKey = (String, String);

#[derive(Default)]
pub struct Store {
  courses: RwLock<HashMap<String, Course>>,
  chapters: RwLock<HashMap<String, Chapter>>,
  /// Question sets keyed by chapter id, kept sorted by question number.
  questions: RwLock<HashMap<String, Vec<ChapterQuestion>>>,
  /// (user_id, question_id) -> answer.
  answers: RwLock<HashMap<UserKey, UserQuestionAnswer>>,
  /// (user_id, chapter_id) -> unlock row.
  chapter_progress: RwLock<HashMap<UserKey, UserChapterProgress>>,
  /// (user_id, course_id) -> enrollment.
  course_progress: RwLock<HashMap<UserKey, UserCourseProgress>>,
  points: RwLock<HashMap<String, UserPoints>>,
  history: RwLock<Vec<PointsHistoryEntry>>,
  assessments: RwLock<Vec<Assessment>>,
  /// (user_id, achievement_id) -> unlock.
  user_achievements: RwLock<HashMap<UserKey, UserAchievement>>,
  #[cfg(test)]
  fail_reads: std::sync::atomic::AtomicBool,
}

impl Store {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, std::sync::atomic::Ordering::SeqCst);
  }

  fn check_available(&self) -> Result<(), StoreError> {
    #[cfg(test)]
    if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(StoreError::Unavailable("simulated read failure".into()));
    }
    Ok(())
  }

  // ----- courses & chapters -----

  pub async fn create_course(
    &self,
    title: &str,
    description: &str,
    outline: &[(String, String)],
  ) -> (Course, Vec<Chapter>) {
    let course = Course {
      id: Uuid::new_v4().to_string(),
      title: title.to_string(),
      description: description.to_string(),
      created_at: Utc::now(),
    };
    let chapters: Vec<Chapter> = outline
      .iter()
      .enumerate()
      .map(|(i, (t, d))| Chapter {
        id: Uuid::new_v4().to_string(),
        course_id: course.id.clone(),
        chapter_number: i as u32 + 1,
        title: t.clone(),
        description: d.clone(),
        content_md: None,
      })
      .collect();
    self.courses.write().await.insert(course.id.clone(), course.clone());
    let mut map = self.chapters.write().await;
    for ch in &chapters {
      map.insert(ch.id.clone(), ch.clone());
    }
    (course, chapters)
  }

  pub async fn course(&self, id: &str) -> Option<Course> {
    self.courses.read().await.get(id).cloned()
  }

  pub async fn chapter(&self, id: &str) -> Option<Chapter> {
    self.chapters.read().await.get(id).cloned()
  }

  pub async fn chapters_of_course(&self, course_id: &str) -> Vec<Chapter> {
    let mut out: Vec<Chapter> = self
      .chapters
      .read()
      .await
      .values()
      .filter(|c| c.course_id == course_id)
      .cloned()
      .collect();
    out.sort_by_key(|c| c.chapter_number);
    out
  }

  pub async fn chapter_by_number(&self, course_id: &str, number: u32) -> Option<Chapter> {
    self
      .chapters
      .read()
      .await
      .values()
      .find(|c| c.course_id == course_id && c.chapter_number == number)
      .cloned()
  }

  pub async fn set_chapter_content(&self, chapter_id: &str, content_md: &str) -> bool {
    match self.chapters.write().await.get_mut(chapter_id) {
      Some(ch) => {
        ch.content_md = Some(content_md.to_string());
        true
      }
      None => false,
    }
  }

  // ----- questions -----

  /// Persisted question count for a chapter. This is the query the readiness
  /// endpoint issues before deciding whether to subscribe.
  pub async fn count_questions(&self, chapter_id: &str) -> Result<usize, StoreError> {
    self.check_available()?;
    Ok(self.questions.read().await.get(chapter_id).map(|v| v.len()).unwrap_or(0))
  }

  pub async fn questions_for_chapter(&self, chapter_id: &str) -> Vec<ChapterQuestion> {
    self.questions.read().await.get(chapter_id).cloned().unwrap_or_default()
  }

  pub async fn question(&self, question_id: &str) -> Option<ChapterQuestion> {
    self
      .questions
      .read()
      .await
      .values()
      .flatten()
      .find(|q| q.id == question_id)
      .cloned()
  }

  /// Store a chapter's question set, replacing any previous set (regeneration
  /// replaces, never appends).
  pub async fn replace_questions(&self, chapter_id: &str, mut set: Vec<ChapterQuestion>) {
    set.sort_by_key(|q| q.question_number);
    self.questions.write().await.insert(chapter_id.to_string(), set);
  }

  // ----- answers -----

  pub async fn answer(&self, user_id: &str, question_id: &str) -> Option<UserQuestionAnswer> {
    self
      .answers
      .read()
      .await
      .get(&(user_id.to_string(), question_id.to_string()))
      .cloned()
  }

  /// Create-or-overwrite a raw answer, clearing any stale evaluation fields.
  pub async fn upsert_raw_answer(
    &self,
    user_id: &str,
    question_id: &str,
    answer: &str,
  ) -> UserQuestionAnswer {
    let row = UserQuestionAnswer {
      user_id: user_id.to_string(),
      question_id: question_id.to_string(),
      answer: answer.to_string(),
      ai_score: None,
      is_correct: None,
      ai_feedback: None,
      ai_suggestions: Vec::new(),
      submitted_at: Utc::now(),
    };
    self
      .answers
      .write()
      .await
      .insert((user_id.to_string(), question_id.to_string()), row.clone());
    row
  }

  pub async fn apply_evaluation(&self, user_id: &str, eval: &AnswerEvaluation) {
    let key = (user_id.to_string(), eval.question_id.clone());
    if let Some(row) = self.answers.write().await.get_mut(&key) {
      row.ai_score = Some(eval.score);
      row.is_correct = Some(eval.is_correct);
      row.ai_feedback = Some(eval.feedback.clone());
      row.ai_suggestions = eval.suggestions.clone();
    }
  }

  // ----- chapter / course progress -----

  pub async fn chapter_progress(&self, user_id: &str, chapter_id: &str) -> Option<UserChapterProgress> {
    self
      .chapter_progress
      .read()
      .await
      .get(&(user_id.to_string(), chapter_id.to_string()))
      .cloned()
  }

  pub async fn course_chapter_progress(&self, user_id: &str, course_id: &str) -> Vec<UserChapterProgress> {
    let chapters = self.chapters_of_course(course_id).await;
    let map = self.chapter_progress.read().await;
    chapters
      .iter()
      .filter_map(|ch| map.get(&(user_id.to_string(), ch.id.clone())).cloned())
      .collect()
  }

  /// Transition a chapter to UNLOCKED. Idempotent: an already UNLOCKED or
  /// COMPLETED row is left untouched. Returns true when state changed.
  pub async fn mark_unlocked(&self, user_id: &str, course_id: &str, chapter_id: &str) -> bool {
    let key = (user_id.to_string(), chapter_id.to_string());
    let mut map = self.chapter_progress.write().await;
    match map.get_mut(&key) {
      Some(row) if row.status == ChapterStatus::Locked => {
        row.status = ChapterStatus::Unlocked;
        row.unlocked_at = Some(Utc::now());
        true
      }
      Some(_) => false,
      None => {
        map.insert(
          key,
          UserChapterProgress {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
            status: ChapterStatus::Unlocked,
            unlocked_at: Some(Utc::now()),
            completed_at: None,
          },
        );
        true
      }
    }
  }

  /// Transition a chapter to COMPLETED (upsert keyed by user+chapter).
  pub async fn mark_completed(&self, user_id: &str, course_id: &str, chapter_id: &str) {
    let key = (user_id.to_string(), chapter_id.to_string());
    let now = Utc::now();
    let mut map = self.chapter_progress.write().await;
    match map.get_mut(&key) {
      Some(row) => {
        row.status = ChapterStatus::Completed;
        row.completed_at = Some(now);
        if row.unlocked_at.is_none() {
          row.unlocked_at = Some(now);
        }
      }
      None => {
        map.insert(
          key,
          UserChapterProgress {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
            status: ChapterStatus::Completed,
            unlocked_at: Some(now),
            completed_at: Some(now),
          },
        );
      }
    }
  }

  /// Idempotent enrollment; an existing row keeps its status and start date.
  pub async fn enroll(&self, user_id: &str, course_id: &str) -> UserCourseProgress {
    let key = (user_id.to_string(), course_id.to_string());
    let mut map = self.course_progress.write().await;
    map
      .entry(key)
      .or_insert_with(|| UserCourseProgress {
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
        status: CourseStatus::InProgress,
        started_at: Utc::now(),
      })
      .clone()
  }

  pub async fn course_progress(&self, user_id: &str, course_id: &str) -> Option<UserCourseProgress> {
    self
      .course_progress
      .read()
      .await
      .get(&(user_id.to_string(), course_id.to_string()))
      .cloned()
  }

  pub async fn set_course_completed(&self, user_id: &str, course_id: &str) {
    let key = (user_id.to_string(), course_id.to_string());
    if let Some(row) = self.course_progress.write().await.get_mut(&key) {
      row.status = CourseStatus::Completed;
    }
  }

  pub async fn count_completed_courses(&self, user_id: &str) -> u32 {
    self
      .course_progress
      .read()
      .await
      .values()
      .filter(|p| p.user_id == user_id && p.status == CourseStatus::Completed)
      .count() as u32
  }

  // ----- points & ledger -----

  pub async fn get_or_create_points(&self, user_id: &str) -> UserPoints {
    self
      .points
      .write()
      .await
      .entry(user_id.to_string())
      .or_insert_with(|| UserPoints::fresh(user_id))
      .clone()
  }

  /// Non-creating read; callers that must not materialize a row use this.
  pub async fn points_of(&self, user_id: &str) -> Option<UserPoints> {
    self.points.read().await.get(user_id).cloned()
  }

  pub async fn save_points(&self, points: UserPoints) {
    self.points.write().await.insert(points.user_id.clone(), points);
  }

  /// Ledger rows are append-only; nothing ever mutates or deletes them.
  pub async fn append_history(&self, entry: PointsHistoryEntry) {
    self.history.write().await.push(entry);
  }

  pub async fn history_for(&self, user_id: &str, limit: usize) -> Vec<PointsHistoryEntry> {
    let all = self.history.read().await;
    let mut out: Vec<PointsHistoryEntry> =
      all.iter().filter(|h| h.user_id == user_id).cloned().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out.truncate(limit);
    out
  }

  pub async fn leaderboard(&self, by_level: bool, limit: usize) -> Vec<UserPoints> {
    let mut all: Vec<UserPoints> = self.points.read().await.values().cloned().collect();
    if by_level {
      all.sort_by(|a, b| b.level.cmp(&a.level).then(b.total_points.cmp(&a.total_points)));
    } else {
      all.sort_by(|a, b| b.total_points.cmp(&a.total_points));
    }
    all.truncate(limit);
    all
  }

  /// 1-based rank of a user by points or level (users above + 1).
  pub async fn rank_of(&self, user_id: &str, by_level: bool) -> usize {
    let map = self.points.read().await;
    let mine = map.get(user_id);
    let (my_points, my_level) = mine.map(|p| (p.total_points, p.level)).unwrap_or((0, 1));
    let above = map
      .values()
      .filter(|p| {
        if by_level {
          p.level > my_level
        } else {
          p.total_points > my_points
        }
      })
      .count();
    above + 1
  }

  // ----- assessments -----

  pub async fn insert_assessment(&self, assessment: Assessment) {
    self.assessments.write().await.push(assessment);
  }

  pub async fn assessments_for(
    &self,
    user_id: &str,
    chapter_id: Option<&str>,
    course_id: Option<&str>,
  ) -> Vec<Assessment> {
    let all = self.assessments.read().await;
    let mut out: Vec<Assessment> = all
      .iter()
      .filter(|a| a.user_id == user_id)
      .filter(|a| chapter_id.map(|c| a.chapter_id == c).unwrap_or(true))
      .filter(|a| course_id.map(|c| a.course_id == c).unwrap_or(true))
      .cloned()
      .collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out
  }

  pub async fn count_passed_assessments(&self, user_id: &str) -> u32 {
    self
      .assessments
      .read()
      .await
      .iter()
      .filter(|a| a.user_id == user_id && a.can_progress)
      .count() as u32
  }

  pub async fn count_perfect_assessments(&self, user_id: &str) -> u32 {
    self
      .assessments
      .read()
      .await
      .iter()
      .filter(|a| a.user_id == user_id && a.score == 100)
      .count() as u32
  }

  // ----- achievements -----

  pub async fn has_achievement(&self, user_id: &str, achievement_id: &str) -> bool {
    self
      .user_achievements
      .read()
      .await
      .contains_key(&(user_id.to_string(), achievement_id.to_string()))
  }

  /// Unique per (user, achievement); a second unlock attempt is a no-op.
  pub async fn insert_achievement(&self, user_id: &str, achievement_id: &str) -> UserAchievement {
    let key = (user_id.to_string(), achievement_id.to_string());
    self
      .user_achievements
      .write()
      .await
      .entry(key)
      .or_insert_with(|| UserAchievement {
        user_id: user_id.to_string(),
        achievement_id: achievement_id.to_string(),
        unlocked_at: Utc::now(),
      })
      .clone()
  }

  pub async fn achievements_of(&self, user_id: &str) -> Vec<UserAchievement> {
    let mut out: Vec<UserAchievement> = self
      .user_achievements
      .read()
      .await
      .values()
      .filter(|a| a.user_id == user_id)
      .cloned()
      .collect();
    out.sort_by(|a, b| b.unlocked_at.cmp(&a.unlocked_at));
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn course_creation_numbers_chapters_from_one() {
    let store = Store::new();
    let (course, chapters) = store
      .create_course(
        "Rust",
        "Intro",
        &[("Basics".into(), "d1".into()), ("Ownership".into(), "d2".into())],
      )
      .await;
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].chapter_number, 1);
    assert_eq!(chapters[1].chapter_number, 2);
    assert_eq!(
      store.chapter_by_number(&course.id, 2).await.unwrap().title,
      "Ownership"
    );
  }

  #[tokio::test]
  async fn raw_answer_upsert_clears_stale_evaluation() {
    let store = Store::new();
    store.upsert_raw_answer("u", "q", "first answer").await;
    store
      .apply_evaluation(
        "u",
        &AnswerEvaluation {
          question_id: "q".into(),
          score: 80,
          is_correct: true,
          feedback: "good".into(),
          suggestions: vec![],
        },
      )
      .await;
    assert_eq!(store.answer("u", "q").await.unwrap().ai_score, Some(80));

    store.upsert_raw_answer("u", "q", "second answer").await;
    let row = store.answer("u", "q").await.unwrap();
    assert_eq!(row.answer, "second answer");
    assert_eq!(row.ai_score, None);
    assert_eq!(row.is_correct, None);
    assert_eq!(row.ai_feedback, None);
  }

  #[tokio::test]
  async fn unlock_is_idempotent_and_never_downgrades() {
    let store = Store::new();
    assert!(store.mark_unlocked("u", "c", "ch").await);
    assert!(!store.mark_unlocked("u", "c", "ch").await);
    store.mark_completed("u", "c", "ch").await;
    assert!(!store.mark_unlocked("u", "c", "ch").await);
    let row = store.chapter_progress("u", "ch").await.unwrap();
    assert_eq!(row.status, ChapterStatus::Completed);
  }

  #[tokio::test]
  async fn failure_toggle_surfaces_as_store_error() {
    let store = Store::new();
    store.set_fail_reads(true);
    assert!(store.count_questions("ch").await.is_err());
    store.set_fail_reads(false);
    assert_eq!(store.count_questions("ch").await.unwrap(), 0);
  }
}
