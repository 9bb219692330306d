//! Server-sent readiness notifications for chapter question generation.
//!
//! One long-lived GET per waiting client. The handler consults persisted
//! state before touching the bus: if the question set already exists the
//! stream answers immediately and never subscribes. Otherwise it subscribes,
//! re-checks (generation may have finished in between), acks with
//! `connected`, and waits for a matching `chapter:questions:ready` emission
//! up to the configured budget. Every connection ends with exactly one
//! terminal event: `ready`, `timeout` or `error`. Dropping the stream drops
//! the subscription with it.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyQuery {
  pub chapter_id: Option<String>,
}

fn named_json(name: &str, payload: Value) -> Event {
  Event::default().event(name).data(payload.to_string())
}

fn ready_event(chapter_id: &str, count: usize, source: &str, timestamp: Option<i64>) -> Event {
  let mut payload = json!({"chapterId": chapter_id, "count": count, "source": source});
  if let Some(ts) = timestamp {
    payload["timestamp"] = json!(ts);
  }
  named_json("ready", payload)
}

#[instrument(level = "info", skip(state, query), fields(chapter_id = query.chapter_id.as_deref().unwrap_or("")))]
pub async fn questions_ready(
  State(state): State<Arc<AppState>>,
  Query(query): Query<ReadyQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
  // Rejected as a plain 400 before any stream is opened.
  let chapter_id = match query.chapter_id {
    Some(id) if !id.trim().is_empty() => id,
    _ => return Err(AppError::BadRequest("chapterId query parameter is required".into())),
  };

  let budget = state.readiness_timeout;
  let stream = stream! {
    // Fast path: the set is already persisted, no subscription needed.
    match state.store.count_questions(&chapter_id).await {
      Ok(count) if count > 0 => {
        info!(target: "readiness", chapter_id = %chapter_id, count, "questions already available");
        yield Ok(ready_event(&chapter_id, count, "existing", None));
        return;
      }
      Ok(_) => {}
      Err(e) => {
        error!(target: "readiness", chapter_id = %chapter_id, error = %e, "readiness check failed");
        yield Ok(named_json("error", json!({"message": e.to_string()})));
        return;
      }
    }

    let (_sub, mut rx) = state.events.subscribe_chapter_questions_ready();

    // Generation may have completed between the check above and the
    // subscription; re-reading here closes that window.
    if let Ok(count) = state.store.count_questions(&chapter_id).await {
      if count > 0 {
        yield Ok(ready_event(&chapter_id, count, "existing", None));
        return;
      }
    }

    yield Ok(named_json("connected", json!({"chapterId": chapter_id})));

    let deadline = tokio::time::Instant::now() + budget;
    loop {
      match tokio::time::timeout_at(deadline, rx.recv()).await {
        Ok(Some(ev)) if ev.chapter_id == chapter_id => {
          info!(target: "readiness", chapter_id = %chapter_id, count = ev.question_count, "questions became ready");
          yield Ok(ready_event(&chapter_id, ev.question_count, "generated", Some(ev.timestamp)));
          return;
        }
        // An emission for some other chapter; keep waiting.
        Ok(Some(_)) => continue,
        Ok(None) => {
          yield Ok(named_json("error", json!({"message": "event stream closed"})));
          return;
        }
        Err(_) => {
          info!(target: "readiness", chapter_id = %chapter_id, "readiness wait timed out");
          yield Ok(named_json(
            "timeout",
            json!({"chapterId": chapter_id, "message": "timed out waiting for question generation"}),
          ));
          return;
        }
      }
    }
  };

  Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
