//! Reusable client for the readiness stream.
//!
//! `ReadinessWatcher` opens the SSE endpoint for a chapter and publishes its
//! progress on a `tokio::sync::watch` channel, so any number of observers can
//! follow `Idle -> Loading -> Connected -> Ready | Error` without holding the
//! connection themselves. Watching a new chapter (or calling `retry`) aborts
//! the previous connection task, so at most one stream is open per watcher.
//!
//! Frame parsing is a pure incremental function over the byte stream; TCP
//! chunk boundaries carry no meaning for it.

use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 300;

#[derive(Clone, Debug, PartialEq)]
pub enum ReadinessState {
  Idle,
  Loading,
  Connected,
  Ready { count: usize, source: String },
  Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyPayload {
  count: usize,
  source: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
  #[serde(default)]
  message: Option<String>,
}

/// One parsed SSE frame. `event` defaults to "message" when the frame names
/// none; comment-only frames never surface.
#[derive(Clone, Debug, PartialEq)]
pub struct SseFrame {
  pub event: String,
  pub data: String,
}

/// Incremental SSE frame parser. Feed it raw chunks in arrival order; it
/// returns every frame completed by the chunk and buffers the remainder.
#[derive(Debug, Default)]
pub struct SseParser {
  buf: Vec<u8>,
}

impl SseParser {
  pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
    self.buf.extend_from_slice(chunk);
    let mut frames = Vec::new();
    while let Some(end) = find_frame_end(&self.buf) {
      let raw: Vec<u8> = self.buf.drain(..end + 2).collect();
      if let Some(frame) = parse_frame(&raw[..end]) {
        frames.push(frame);
      }
    }
    frames
  }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
  buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(raw: &[u8]) -> Option<SseFrame> {
  let text = String::from_utf8_lossy(raw);
  let mut event: Option<String> = None;
  let mut data: Vec<&str> = Vec::new();
  for line in text.lines() {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.starts_with(':') {
      continue;
    }
    let (field, value) = match line.split_once(':') {
      Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
      None => (line, ""),
    };
    match field {
      "event" => event = Some(value.to_string()),
      "data" => data.push(value),
      // id and retry fields are irrelevant here.
      _ => {}
    }
  }
  if event.is_none() && data.is_empty() {
    return None;
  }
  Some(SseFrame {
    event: event.unwrap_or_else(|| "message".to_string()),
    data: data.join("\n"),
  })
}

pub struct ReadinessWatcher {
  base_url: String,
  http: reqwest::Client,
  timeout: Duration,
  tx: watch::Sender<ReadinessState>,
  task: Option<JoinHandle<()>>,
  chapter: Option<String>,
  retries: u32,
}

impl ReadinessWatcher {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self::with_timeout(base_url, Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS))
  }

  pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
    let (tx, _rx) = watch::channel(ReadinessState::Idle);
    Self {
      base_url: base_url.into(),
      http: reqwest::Client::new(),
      timeout,
      tx,
      task: None,
      chapter: None,
      retries: 0,
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
    self.tx.subscribe()
  }

  pub fn retry_count(&self) -> u32 {
    self.retries
  }

  /// Start (or restart) watching a chapter. Any previous connection task and
  /// its timeout guard are aborted first.
  pub fn watch(&mut self, chapter_id: &str) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
    self.chapter = Some(chapter_id.to_string());
    let _ = self.tx.send(ReadinessState::Loading);

    let url = format!("{}/api/v1/questions/ready?chapterId={}", self.base_url, chapter_id);
    let http = self.http.clone();
    let tx = self.tx.clone();
    let budget = self.timeout;
    self.task = Some(tokio::spawn(async move {
      match tokio::time::timeout(budget, run_stream(http, &url, &tx)).await {
        Ok(Ok(())) => {}
        Ok(Err(message)) => {
          warn!(target: "readiness", %url, %message, "readiness stream failed");
          let _ = tx.send(ReadinessState::Error { message });
        }
        Err(_) => {
          let _ = tx.send(ReadinessState::Error {
            message: "timed out waiting for readiness".to_string(),
          });
        }
      }
    }));
  }

  /// Force a fresh connection for the chapter last watched.
  pub fn retry(&mut self) {
    self.retries += 1;
    if let Some(chapter) = self.chapter.clone() {
      self.watch(&chapter);
    }
  }
}

impl Drop for ReadinessWatcher {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

/// Drive one connection to its terminal frame. Ok means a `ready` was
/// published; every other outcome is an error message for the watch channel.
async fn run_stream(
  http: reqwest::Client,
  url: &str,
  tx: &watch::Sender<ReadinessState>,
) -> Result<(), String> {
  let res = http.get(url).send().await.map_err(|e| e.to_string())?;
  if !res.status().is_success() {
    return Err(format!("server returned {}", res.status()));
  }

  let mut stream = res.bytes_stream();
  let mut parser = SseParser::default();
  while let Some(chunk) = stream.next().await {
    let chunk = chunk.map_err(|e| e.to_string())?;
    for frame in parser.push(&chunk) {
      debug!(target: "readiness", event = %frame.event, "frame received");
      match frame.event.as_str() {
        "connected" => {
          let _ = tx.send(ReadinessState::Connected);
        }
        "ready" => {
          let payload: ReadyPayload = serde_json::from_str(&frame.data)
            .map_err(|e| format!("malformed ready payload: {e}"))?;
          let _ = tx.send(ReadinessState::Ready {
            count: payload.count,
            source: payload.source,
          });
          return Ok(());
        }
        "timeout" => {
          return Err("timed out waiting for question generation".to_string());
        }
        "error" => {
          let message = serde_json::from_str::<ErrorPayload>(&frame.data)
            .ok()
            .and_then(|p| p.message)
            .unwrap_or_else(|| "readiness stream reported an error".to_string());
          return Err(message);
        }
        _ => {}
      }
    }
  }
  Err("stream ended without a terminal event".to_string())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::domain::ChapterQuestion;
  use crate::routes::router;
  use crate::state::AppState;

  // ----- parser -----

  #[test]
  fn parser_handles_split_and_batched_frames() {
    let mut p = SseParser::default();
    assert!(p.push(b"event: conn").is_empty());
    let frames = p.push(b"ected\ndata: {}\n\nevent: ready\ndata: {\"count\":3}\n\n");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].event, "connected");
    assert_eq!(frames[1].event, "ready");
    assert_eq!(frames[1].data, "{\"count\":3}");
  }

  #[test]
  fn parser_ignores_comments_and_defaults_the_event_name() {
    let mut p = SseParser::default();
    assert!(p.push(b": keep-alive\n\n").is_empty());
    let frames = p.push(b"data: hello\ndata: world\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "message");
    assert_eq!(frames[0].data, "hello\nworld");
  }

  #[test]
  fn parser_tolerates_carriage_returns() {
    let mut p = SseParser::default();
    let frames = p.push(b"event: ready\r\ndata: {\"count\":1}\r\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "{\"count\":1}");
  }

  // ----- end to end against a live listener -----

  async fn spawn_server(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
  }

  async fn seed_questions(state: &AppState, chapter_id: &str, n: usize) {
    let set = (1..=n)
      .map(|i| ChapterQuestion {
        id: format!("q{i}"),
        chapter_id: chapter_id.to_string(),
        question_number: i as u32,
        question_text: format!("Question {i}"),
        question_type: "open".into(),
        question_category: "comprehension".into(),
        difficulty: "medium".into(),
        hints: vec![],
        options: None,
      })
      .collect();
    state.store.replace_questions(chapter_id, set).await;
  }

  async fn next_terminal(rx: &mut watch::Receiver<ReadinessState>) -> ReadinessState {
    loop {
      rx.changed().await.unwrap();
      let state = rx.borrow().clone();
      match state {
        ReadinessState::Ready { .. } | ReadinessState::Error { .. } => return state,
        _ => {}
      }
    }
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn existing_questions_resolve_ready_immediately() {
    let state = AppState::for_tests();
    seed_questions(&state, "ch-1", 4).await;
    let base = spawn_server(state).await;

    let mut watcher = ReadinessWatcher::new(base);
    let mut rx = watcher.subscribe();
    watcher.watch("ch-1");

    match next_terminal(&mut rx).await {
      ReadinessState::Ready { count, source } => {
        assert_eq!(count, 4);
        assert_eq!(source, "existing");
      }
      other => panic!("expected Ready, got {other:?}"),
    }
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn generated_questions_resolve_after_the_event() {
    let state = AppState::for_tests().with_readiness_timeout(Duration::from_secs(10));
    let base = spawn_server(state.clone()).await;

    let mut watcher = ReadinessWatcher::new(base);
    let mut rx = watcher.subscribe();
    watcher.watch("ch-2");

    // Wait for the server-side subscription, then announce readiness.
    {
      let state = state.clone();
      tokio::spawn(async move {
        while state.events.bus().listener_count(crate::events::CHAPTER_QUESTIONS_READY) == 0 {
          tokio::time::sleep(Duration::from_millis(5)).await;
        }
        state.events.emit_chapter_questions_ready(crate::events::ChapterQuestionsReady {
          chapter_id: "ch-2".into(),
          question_count: 6,
          timestamp: 1,
        });
      });
    }

    match next_terminal(&mut rx).await {
      ReadinessState::Ready { count, source } => {
        assert_eq!(count, 6);
        assert_eq!(source, "generated");
      }
      other => panic!("expected Ready, got {other:?}"),
    }
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn client_side_timeout_forces_error() {
    let state = AppState::for_tests().with_readiness_timeout(Duration::from_secs(60));
    let base = spawn_server(state).await;

    let mut watcher = ReadinessWatcher::with_timeout(base, Duration::from_millis(100));
    let mut rx = watcher.subscribe();
    watcher.watch("ch-3");

    match next_terminal(&mut rx).await {
      ReadinessState::Error { message } => assert!(message.contains("timed out")),
      other => panic!("expected Error, got {other:?}"),
    }
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn retry_opens_a_fresh_connection() {
    let state = AppState::for_tests().with_readiness_timeout(Duration::from_secs(60));
    let base = spawn_server(state.clone()).await;

    let mut watcher = ReadinessWatcher::new(base);
    let mut rx = watcher.subscribe();
    watcher.watch("ch-4");

    // First connection hangs waiting; make the data appear, then retry. The
    // fresh connection takes the existing fast path.
    {
      rx.changed().await.unwrap();
      // Loading or Connected, never terminal yet.
      assert!(!matches!(*rx.borrow(), ReadinessState::Ready { .. }));
    }
    seed_questions(&state, "ch-4", 2).await;
    watcher.retry();
    assert_eq!(watcher.retry_count(), 1);

    match next_terminal(&mut rx).await {
      ReadinessState::Ready { count, source } => {
        assert_eq!(count, 2);
        assert_eq!(source, "existing");
      }
      other => panic!("expected Ready, got {other:?}"),
    }
  }
}
