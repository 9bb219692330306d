//! Collaborator contracts for the LLM-backed services.
//!
//! The engine never talks to OpenAI directly; it consumes these narrow traits
//! so tests can inject fixed fakes (the real model's output is not stable
//! across retries, so arithmetic and state transitions are verified against
//! deterministic implementations).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollabError(pub String);

/// Inputs for generating a chapter's comprehension question set.
#[derive(Clone, Debug)]
pub struct QuestionRequest {
  pub course_title: String,
  pub chapter_title: String,
  pub chapter_content: String,
  pub level: String,
}

/// One question as produced by the generation collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
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

/// One (question, answer) pair handed to the batch evaluator.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerToEvaluate {
  pub question_id: String,
  pub question: String,
  pub user_answer: String,
}

/// Per-question verdict returned by the batch evaluator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEvaluation {
  pub question_id: String,
  pub score: u32,
  pub is_correct: bool,
  pub feedback: String,
  #[serde(default)]
  pub suggestions: Vec<String>,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
  async fn generate_questions(&self, req: &QuestionRequest) -> Result<Vec<GeneratedQuestion>, CollabError>;
}

#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
  /// Evaluate the whole batch in one call; partial results are never returned.
  async fn evaluate_batch(
    &self,
    level: &str,
    items: &[AnswerToEvaluate],
  ) -> Result<Vec<AnswerEvaluation>, CollabError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
  async fn generate_content(
    &self,
    course_title: &str,
    chapter_title: &str,
    chapter_description: &str,
  ) -> Result<String, CollabError>;
}
