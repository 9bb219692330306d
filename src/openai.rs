//! Minimal OpenAI client for our use-cases.
//!
//! We only call chat.completions and request either plain text or a strict
//! JSON object. Calls are instrumented and log model names, latencies, and
//! response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::ai::{
  AnswerEvaluation, AnswerEvaluator, AnswerToEvaluate, CollabError, ContentGenerator,
  GeneratedQuestion, QuestionGenerator, QuestionRequest,
};
use crate::config::Prompts;
use crate::util::fill_template;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  prompts: Prompts,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, fast_model, strong_model, prompts })
  }

  /// Plain-text chat completion. Used for chapter content drafting.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_plain(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: None,
      max_tokens: None,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "kurso-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();

    Ok(text)
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "kurso-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();

    serde_json::from_str::<T>(&text).map_err(|e| {
      error!(sample = %crate::util::trunc_for_log(&text, 200), "Model returned non-conforming JSON");
      format!("JSON parse error: {}", e)
    })
  }
}

#[derive(Deserialize)]
struct QuestionBatchGen {
  questions: Vec<GeneratedQuestion>,
}

#[derive(Deserialize)]
struct EvalBatchGen {
  evaluations: Vec<AnswerEvaluation>,
}

#[async_trait]
impl QuestionGenerator for OpenAI {
  #[instrument(level = "info", skip(self, req), fields(chapter_title = %req.chapter_title, model = %self.strong_model))]
  async fn generate_questions(&self, req: &QuestionRequest) -> Result<Vec<GeneratedQuestion>, CollabError> {
    let user = fill_template(
      &self.prompts.question_user_template,
      &[
        ("course_title", req.course_title.as_str()),
        ("chapter_title", req.chapter_title.as_str()),
        ("chapter_content", req.chapter_content.as_str()),
        ("level", req.level.as_str()),
      ],
    );
    let start = std::time::Instant::now();
    let result = self
      .chat_json::<QuestionBatchGen>(&self.strong_model, &self.prompts.question_system, &user, 0.8)
      .await;
    let elapsed = start.elapsed();

    match result {
      Ok(batch) if batch.questions.is_empty() => {
        error!(?elapsed, "Model returned an empty question set");
        Err(CollabError("model returned no questions".into()))
      }
      Ok(batch) => {
        info!(?elapsed, count = batch.questions.len(), "Question set generated");
        Ok(batch.questions)
      }
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during question generation");
        Err(CollabError(e))
      }
    }
  }
}

#[async_trait]
impl AnswerEvaluator for OpenAI {
  #[instrument(level = "info", skip(self, items), fields(batch = items.len(), model = %self.strong_model))]
  async fn evaluate_batch(
    &self,
    level: &str,
    items: &[AnswerToEvaluate],
  ) -> Result<Vec<AnswerEvaluation>, CollabError> {
    let items_json = serde_json::to_string(items).map_err(|e| CollabError(e.to_string()))?;
    let user = fill_template(
      &self.prompts.eval_user_template,
      &[("level", level), ("items_json", items_json.as_str())],
    );
    let batch: EvalBatchGen = self
      .chat_json(&self.strong_model, &self.prompts.eval_system, &user, 0.2)
      .await
      .map_err(CollabError)?;

    // Clamp model scores into the contract range before anything persists them.
    let evaluations = batch
      .evaluations
      .into_iter()
      .map(|mut e| {
        e.score = e.score.min(100);
        e
      })
      .collect();
    Ok(evaluations)
  }
}

#[async_trait]
impl ContentGenerator for OpenAI {
  #[instrument(level = "info", skip(self, chapter_description), fields(%chapter_title, model = %self.fast_model))]
  async fn generate_content(
    &self,
    course_title: &str,
    chapter_title: &str,
    chapter_description: &str,
  ) -> Result<String, CollabError> {
    let user = fill_template(
      &self.prompts.content_user_template,
      &[
        ("course_title", course_title),
        ("chapter_title", chapter_title),
        ("chapter_description", chapter_description),
      ],
    );
    self
      .chat_plain(&self.fast_model, &self.prompts.content_system, &user, 0.7)
      .await
      .map_err(CollabError)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
