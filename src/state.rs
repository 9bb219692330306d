//! Application state: stores, event bus, and AI collaborators.
//!
//! The collaborators are optional: without OPENAI_API_KEY the service still
//! runs, and any operation that needs a collaborator fails with an explicit
//! 502-style error instead of degrading silently.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::ai::{AnswerEvaluator, ContentGenerator, QuestionGenerator};
use crate::config::load_agent_config_from_env;
use crate::events::TypedEvents;
use crate::openai::OpenAI;
use crate::store::Store;

const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 300;

pub struct AppState {
  pub store: Store,
  pub events: TypedEvents,
  pub generator: Option<Arc<dyn QuestionGenerator>>,
  pub evaluator: Option<Arc<dyn AnswerEvaluator>>,
  pub content: Option<Arc<dyn ContentGenerator>>,
  /// Server-side budget for one readiness connection.
  pub readiness_timeout: Duration,
}

impl AppState {
  /// Build state from env: load config, init stores, build the OpenAI client.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    let prompts = load_agent_config_from_env()
      .map(|c| c.prompts)
      .unwrap_or_default();

    let readiness_timeout = std::env::var("READINESS_TIMEOUT_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .map(Duration::from_secs)
      .unwrap_or(Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS));

    let (generator, evaluator, content) = match OpenAI::from_env(prompts) {
      Some(oa) => {
        info!(target: "kurso_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, "OpenAI enabled.");
        let oa = Arc::new(oa);
        (
          Some(oa.clone() as Arc<dyn QuestionGenerator>),
          Some(oa.clone() as Arc<dyn AnswerEvaluator>),
          Some(oa as Arc<dyn ContentGenerator>),
        )
      }
      None => {
        info!(target: "kurso_backend", "OpenAI disabled (no OPENAI_API_KEY). AI-backed operations will fail explicitly.");
        (None, None, None)
      }
    };

    Self {
      store: Store::new(),
      events: TypedEvents::new(),
      generator,
      evaluator,
      content,
      readiness_timeout,
    }
  }
}

#[cfg(test)]
impl AppState {
  /// Fresh state for tests: no collaborators, default budget.
  pub fn for_tests() -> Arc<Self> {
    Arc::new(Self {
      store: Store::new(),
      events: TypedEvents::new(),
      generator: None,
      evaluator: None,
      content: None,
      readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
    })
  }

  pub fn with_evaluator(self: Arc<Self>, evaluator: Arc<dyn AnswerEvaluator>) -> Arc<Self> {
    let mut state = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("state still shared"));
    state.evaluator = Some(evaluator);
    Arc::new(state)
  }

  pub fn with_generator(self: Arc<Self>, generator: Arc<dyn QuestionGenerator>) -> Arc<Self> {
    let mut state = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("state still shared"));
    state.generator = Some(generator);
    Arc::new(state)
  }

  pub fn with_readiness_timeout(self: Arc<Self>, timeout: Duration) -> Arc<Self> {
    let mut state = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("state still shared"));
    state.readiness_timeout = timeout;
    Arc::new(state)
  }
}
