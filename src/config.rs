//! Loading agent configuration (prompt templates) from TOML.
//!
//! See `AgentConfig` and `Prompts` for the expected schema. Everything has a
//! default, so the config file is entirely optional.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
}

/// Prompts used by the OpenAI client. Defaults cover question generation,
/// batch answer evaluation and chapter content drafting. Override them in
/// TOML if you need to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  // Comprehension question generation
  pub question_system: String,
  pub question_user_template: String,
  // Batch answer evaluation
  pub eval_system: String,
  pub eval_user_template: String,
  // Chapter content drafting
  pub content_system: String,
  pub content_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      question_system: "You are a course assessment designer. Respond ONLY with strict JSON.".into(),
      question_user_template: "Course: {course_title}\nChapter: {chapter_title}\nLearner level: {level}\nChapter content:\n{chapter_content}\n\nWrite 5 open comprehension questions covering the chapter's key ideas. Return JSON: {\"questions\": [{\"questionNumber\": number, \"questionText\": string, \"questionType\": string, \"questionCategory\": string, \"difficulty\": string, \"hints\": [string], \"options\": [string] | null}]}. Number questions from 1.".into(),
      eval_system: "You are a strict but fair answer evaluator. Be concise. Output JSON only.".into(),
      eval_user_template: "Learner level: {level}\nQuestions and answers (JSON): {items_json}\n\nEvaluate every item. Return JSON: {\"evaluations\": [{\"questionId\": string, \"score\": number, \"isCorrect\": boolean, \"feedback\": string, \"suggestions\": [string]}]}. Scoring: 0-100. 'isCorrect' = true if the answer demonstrates real understanding (score >= 60).".into(),
      content_system: "You are a course author writing clear, well-structured Markdown chapters.".into(),
      content_user_template: "Course: {course_title}\nChapter: {chapter_title}\nChapter goal: {chapter_description}\n\nWrite the full chapter in Markdown. Use headings, short paragraphs and concrete examples. Output ONLY the Markdown body.".into(),
    }
  }
}

/// Attempt to load `AgentConfig` from KURSO_CONFIG_PATH. On any parsing/IO
/// error, returns None and the defaults apply.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("KURSO_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "kurso_backend", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "kurso_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "kurso_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
