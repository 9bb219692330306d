//! The chapter-unlock / scoring engine.
//!
//! A strict three-phase pipeline: persist raw answers, evaluate the batch in
//! one collaborator call, then apply the aggregate decision. A failure in
//! phase 2 fails the whole submission and leaves chapter state, points and
//! assessments untouched (the raw answers keep their cleared evaluations, so
//! a retry recomputes from scratch).
//!
//! Pass rule: at least 60% of the chapter's questions judged correct.
//! Points on pass: max(10, round(average/2)), +20 for average >= 90,
//! +10 for a 100% pass rate.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::achievements;
use crate::ai::AnswerToEvaluate;
use crate::domain::{Assessment, ChapterStatus, PointsReason};
use crate::error::AppError;
use crate::events::{now_millis, LearningVerificationComplete};
use crate::points::apply_points;
use crate::protocol::{AssessmentOut, EvaluateIn, EvaluationResultOut};
use crate::state::AppState;

const PASS_RATE_THRESHOLD: f64 = 0.6;
const MIN_ANSWER_CHARS: usize = 10;
const DEFAULT_LEVEL: &str = "intermediate";

/// Run one progression submission end to end.
#[instrument(level = "info", skip(state, input), fields(user_id = %input.user_id, chapter_id = %input.chapter_id, answers = input.answers.len()))]
pub async fn evaluate_chapter(state: &AppState, input: &EvaluateIn) -> Result<AssessmentOut, AppError> {
  let chapter = state
    .store
    .chapter(&input.chapter_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("chapter {} not found", input.chapter_id)))?;

  let questions = state.store.questions_for_chapter(&input.chapter_id).await;
  if questions.is_empty() {
    return Err(AppError::NotFound("no questions found for this chapter".into()));
  }

  // Completeness check: every question answered, each answer >= 10 chars.
  // Rejected before any state mutation or collaborator call.
  let outstanding = questions
    .iter()
    .filter(|q| {
      input
        .answers
        .get(&q.id)
        .map(|a| a.trim().chars().count() < MIN_ANSWER_CHARS)
        .unwrap_or(true)
    })
    .count();
  if outstanding > 0 {
    return Err(AppError::BadRequest(format!(
      "please answer every question first: {} answer(s) missing or shorter than {} characters",
      outstanding, MIN_ANSWER_CHARS
    )));
  }

  let evaluator = state
    .evaluator
    .as_ref()
    .ok_or_else(|| AppError::Collaborator("answer evaluation service unavailable".into()))?;

  // Phase 1: persist raw answers, clearing any stale evaluation. Evaluation
  // is always recomputed from scratch on resubmission.
  for q in &questions {
    if let Some(answer) = input.answers.get(&q.id) {
      state.store.upsert_raw_answer(&input.user_id, &q.id, answer).await;
    }
  }

  // Phase 2: one batch call. No partial credit: an error here aborts the
  // submission and nothing below runs.
  let batch: Vec<AnswerToEvaluate> = questions
    .iter()
    .filter_map(|q| {
      input.answers.get(&q.id).map(|a| AnswerToEvaluate {
        question_id: q.id.clone(),
        question: q.question_text.clone(),
        user_answer: a.clone(),
      })
    })
    .collect();
  let evaluations = evaluator
    .evaluate_batch(DEFAULT_LEVEL, &batch)
    .await
    .map_err(|e| AppError::Collaborator(e.to_string()))?;

  // Phase 3: persist per-question verdicts, then the aggregate decision.
  let mut total_score: u64 = 0;
  let mut passed: usize = 0;
  let by_question: HashMap<&str, &crate::ai::AnswerEvaluation> =
    evaluations.iter().map(|e| (e.question_id.as_str(), e)).collect();

  let mut results = Vec::with_capacity(questions.len());
  for q in &questions {
    let Some(eval) = by_question.get(q.id.as_str()) else {
      warn!(target: "progression", question_id = %q.id, "evaluator returned no verdict for question");
      continue;
    };
    state.store.apply_evaluation(&input.user_id, eval).await;
    total_score += u64::from(eval.score);
    if eval.is_correct {
      passed += 1;
    }
    results.push(EvaluationResultOut {
      question_id: q.id.clone(),
      question_text: q.question_text.clone(),
      user_answer: input.answers.get(&q.id).cloned().unwrap_or_default(),
      score: eval.score,
      feedback: eval.feedback.clone(),
      is_correct: eval.is_correct,
      suggestions: eval.suggestions.clone(),
    });
  }

  let count = questions.len();
  let average = ((total_score as f64) / (count as f64)).round() as u32;
  let pass_rate = (passed as f64) / (count as f64);
  let can_progress = pass_rate >= PASS_RATE_THRESHOLD;

  let mut points_earned: i64 = 0;
  if can_progress {
    points_earned = i64::max(10, ((f64::from(average)) / 2.0).round() as i64);
    if average >= 90 {
      points_earned += 20;
    }
    if pass_rate == 1.0 {
      points_earned += 10;
    }
  }

  info!(
    target: "progression",
    user_id = %input.user_id,
    chapter_id = %input.chapter_id,
    average,
    pass_rate = %format!("{:.2}", pass_rate),
    can_progress,
    points_earned,
    "batch evaluated"
  );

  state
    .store
    .insert_assessment(Assessment {
      id: Uuid::new_v4().to_string(),
      user_id: input.user_id.clone(),
      course_id: chapter.course_id.clone(),
      chapter_id: chapter.id.clone(),
      score: average,
      can_progress,
      created_at: Utc::now(),
    })
    .await;

  if can_progress {
    state
      .store
      .mark_completed(&input.user_id, &chapter.course_id, &chapter.id)
      .await;

    // Unlock the next chapter if one exists. Idempotent by construction.
    if let Some(next) = state
      .store
      .chapter_by_number(&chapter.course_id, chapter.chapter_number + 1)
      .await
    {
      state.store.mark_unlocked(&input.user_id, &chapter.course_id, &next.id).await;
    } else {
      // Last chapter: if every chapter of the course is completed, so is
      // the course.
      let chapters = state.store.chapters_of_course(&chapter.course_id).await;
      let progress = state
        .store
        .course_chapter_progress(&input.user_id, &chapter.course_id)
        .await;
      let completed = progress.iter().filter(|p| p.status == ChapterStatus::Completed).count();
      if completed == chapters.len() {
        state.store.set_course_completed(&input.user_id, &chapter.course_id).await;
      }
    }

    apply_points(
      state,
      &input.user_id,
      points_earned,
      PointsReason::ChapterCompletion,
      Some(format!("Chapter completed: {}", chapter.title)),
    )
    .await?;

    achievements::check_and_unlock(state, &input.user_id).await?;
  }

  state.events.emit_learning_verification_complete(LearningVerificationComplete {
    chapter_id: chapter.id.clone(),
    user_id: input.user_id.clone(),
    score: average,
    passed: can_progress,
    timestamp: now_millis(),
  });

  Ok(AssessmentOut {
    can_progress,
    total_score: average,
    points_earned,
    feedback: format!(
      "Your average score is {}, pass rate {}%",
      average,
      (pass_rate * 100.0).round() as u32
    ),
    evaluation_results: results,
  })
}
