//! In-process event bus and its typed facade.
//!
//! The bus decouples the AI-generation jobs from any number of waiting SSE
//! connections: subscribers register a channel under an event name, `emit`
//! fans the payload out to everyone currently registered, and an event with
//! no subscribers is simply lost. Callers that must not miss anything consult
//! persisted state first (the readiness endpoint does exactly that).
//!
//! There is exactly one bus per process; it lives in `AppState` and is handed
//! to handlers by injection so tests can build a fresh one per case.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const CHAPTER_QUESTIONS_READY: &str = "chapter:questions:ready";
pub const CHAPTER_CONTENT_GENERATED: &str = "chapter:content:generated";
pub const LEARNING_VERIFICATION_COMPLETE: &str = "learning:verification:complete";
pub const ACHIEVEMENT_UNLOCKED: &str = "achievement:unlocked";
pub const POINTS_UPDATED: &str = "points:updated";

type Registry = HashMap<String, HashMap<u64, mpsc::UnboundedSender<Value>>>;

/// Publish/subscribe registry keyed by event name. At-most-once delivery per
/// subscriber per emission; no persistence, no ordering across subscribers.
#[derive(Default)]
pub struct EventBus {
  subscribers: Mutex<Registry>,
  next_id: AtomicU64,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
    // A poisoned lock only means another thread panicked mid-update; the map
    // itself is still usable.
    self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a subscriber. The returned guard unsubscribes on drop (or via
  /// `cancel`, idempotently); the receiver yields every payload emitted under
  /// `event` while the guard is alive.
  pub fn subscribe(self: &Arc<Self>, event: &str) -> (Subscription, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.lock().entry(event.to_string()).or_default().insert(id, tx);
    debug!(target: "events", event, id, "subscriber registered");
    let sub = Subscription {
      bus: Arc::downgrade(self),
      event: event.to_string(),
      id,
    };
    (sub, rx)
  }

  /// Fan the payload out to every currently registered subscriber. A closed
  /// receiver is logged and pruned; it never stops delivery to the rest.
  pub fn emit(&self, event: &str, payload: Value) {
    let mut map = self.lock();
    let Some(subs) = map.get_mut(event) else {
      debug!(target: "events", event, "emitted with no subscribers (dropped)");
      return;
    };
    subs.retain(|id, tx| match tx.send(payload.clone()) {
      Ok(()) => true,
      Err(_) => {
        warn!(target: "events", event, id, "subscriber channel closed; pruning");
        false
      }
    });
    if subs.is_empty() {
      map.remove(event);
    }
  }

  /// Convenience: wait for the next emission of `event`, then unsubscribe.
  /// Returns None if the bus is dropped while waiting.
  pub async fn once(self: &Arc<Self>, event: &str) -> Option<Value> {
    let (_sub, mut rx) = self.subscribe(event);
    rx.recv().await
  }

  /// Number of live subscribers for an event name.
  pub fn listener_count(&self, event: &str) -> usize {
    self.lock().get(event).map(|s| s.len()).unwrap_or(0)
  }

  fn unsubscribe(&self, event: &str, id: u64) {
    let mut map = self.lock();
    if let Some(subs) = map.get_mut(event) {
      subs.remove(&id);
      if subs.is_empty() {
        map.remove(event);
      }
    }
  }
}

/// Guard for one registration. Dropping it removes the subscriber; removal is
/// idempotent and safe after the bus itself is gone.
pub struct Subscription {
  bus: Weak<EventBus>,
  event: String,
  id: u64,
}

impl Subscription {
  pub fn cancel(&self) {
    if let Some(bus) = self.bus.upgrade() {
      bus.unsubscribe(&self.event, self.id);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cancel();
  }
}

// ---------------------------------------------------------------------------
// Typed facade
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterQuestionsReady {
  pub chapter_id: String,
  pub question_count: usize,
  pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterContentGenerated {
  pub chapter_id: String,
  pub content_length: usize,
  pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningVerificationComplete {
  pub chapter_id: String,
  pub user_id: String,
  pub score: u32,
  pub passed: bool,
  pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUnlocked {
  pub user_id: String,
  pub achievement_id: String,
  pub achievement_title: String,
  pub points: i64,
  pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsUpdated {
  pub user_id: String,
  pub old_points: i64,
  pub new_points: i64,
  pub reason: String,
  pub timestamp: i64,
}

pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Receiver half of a typed subscription. Malformed payloads (possible only if
/// some producer bypasses the facade) are logged and skipped, never fatal.
pub struct TypedReceiver<T> {
  rx: mpsc::UnboundedReceiver<Value>,
  event: &'static str,
  _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> TypedReceiver<T> {
  pub async fn recv(&mut self) -> Option<T> {
    while let Some(raw) = self.rx.recv().await {
      match serde_json::from_value::<T>(raw) {
        Ok(ev) => return Some(ev),
        Err(e) => {
          warn!(target: "events", event = self.event, error = %e, "skipping malformed payload");
        }
      }
    }
    None
  }
}

/// Closed, typed vocabulary over the bus: one emit and one subscribe method
/// per event kind, pure delegation plus serde narrowing.
#[derive(Clone)]
pub struct TypedEvents {
  bus: Arc<EventBus>,
}

impl Default for TypedEvents {
  fn default() -> Self {
    Self::new()
  }
}

macro_rules! typed_event {
  ($emit:ident, $subscribe:ident, $name:ident, $ty:ty) => {
    pub fn $emit(&self, ev: $ty) {
      self.emit_value($name, &ev);
    }

    pub fn $subscribe(&self) -> (Subscription, TypedReceiver<$ty>) {
      let (sub, rx) = self.bus.subscribe($name);
      (sub, TypedReceiver { rx, event: $name, _marker: PhantomData })
    }
  };
}

impl TypedEvents {
  pub fn new() -> Self {
    Self { bus: Arc::new(EventBus::new()) }
  }

  pub fn bus(&self) -> &Arc<EventBus> {
    &self.bus
  }

  fn emit_value<T: Serialize>(&self, event: &str, ev: &T) {
    match serde_json::to_value(ev) {
      Ok(v) => self.bus.emit(event, v),
      Err(e) => warn!(target: "events", event, error = %e, "failed to serialize event payload"),
    }
  }

  typed_event!(emit_chapter_questions_ready, subscribe_chapter_questions_ready, CHAPTER_QUESTIONS_READY, ChapterQuestionsReady);
  typed_event!(emit_chapter_content_generated, subscribe_chapter_content_generated, CHAPTER_CONTENT_GENERATED, ChapterContentGenerated);
  typed_event!(emit_learning_verification_complete, subscribe_learning_verification_complete, LEARNING_VERIFICATION_COMPLETE, LearningVerificationComplete);
  typed_event!(emit_achievement_unlocked, subscribe_achievement_unlocked, ACHIEVEMENT_UNLOCKED, AchievementUnlocked);
  typed_event!(emit_points_updated, subscribe_points_updated, POINTS_UPDATED, PointsUpdated);
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn emit_reaches_every_subscriber() {
    let bus = Arc::new(EventBus::new());
    let (_s1, mut r1) = bus.subscribe("ev");
    let (_s2, mut r2) = bus.subscribe("ev");
    bus.emit("ev", json!({"n": 1}));
    assert_eq!(r1.recv().await.unwrap(), json!({"n": 1}));
    assert_eq!(r2.recv().await.unwrap(), json!({"n": 1}));
  }

  #[tokio::test]
  async fn emission_without_subscribers_is_lost() {
    let bus = Arc::new(EventBus::new());
    bus.emit("ev", json!(1));
    let (_sub, mut rx) = bus.subscribe("ev");
    bus.emit("ev", json!(2));
    // Only the post-subscription emission arrives.
    assert_eq!(rx.recv().await.unwrap(), json!(2));
  }

  #[tokio::test]
  async fn unsubscribe_is_idempotent_and_drop_unregisters() {
    let bus = Arc::new(EventBus::new());
    let (sub, _rx) = bus.subscribe("ev");
    assert_eq!(bus.listener_count("ev"), 1);
    sub.cancel();
    sub.cancel();
    assert_eq!(bus.listener_count("ev"), 0);
    drop(sub);
    assert_eq!(bus.listener_count("ev"), 0);
  }

  #[tokio::test]
  async fn closed_receiver_does_not_block_the_rest() {
    let bus = Arc::new(EventBus::new());
    let (_s1, r1) = bus.subscribe("ev");
    let (_s2, mut r2) = bus.subscribe("ev");
    drop(r1);
    bus.emit("ev", json!("still delivered"));
    assert_eq!(r2.recv().await.unwrap(), json!("still delivered"));
    // The dead channel was pruned during emit.
    assert_eq!(bus.listener_count("ev"), 1);
  }

  #[tokio::test]
  async fn once_unsubscribes_after_first_event() {
    let bus = Arc::new(EventBus::new());
    let waiter = {
      let bus = bus.clone();
      tokio::spawn(async move { bus.once("ev").await })
    };
    // Give the waiter a chance to register.
    tokio::task::yield_now().await;
    while bus.listener_count("ev") == 0 {
      tokio::task::yield_now().await;
    }
    bus.emit("ev", json!(7));
    assert_eq!(waiter.await.unwrap(), Some(json!(7)));
    assert_eq!(bus.listener_count("ev"), 0);
  }

  #[tokio::test]
  async fn typed_facade_round_trips_payloads() {
    let events = TypedEvents::new();
    let (_sub, mut rx) = events.subscribe_chapter_questions_ready();
    events.emit_chapter_questions_ready(ChapterQuestionsReady {
      chapter_id: "ch-1".into(),
      question_count: 5,
      timestamp: 42,
    });
    let got = rx.recv().await.unwrap();
    assert_eq!(got.chapter_id, "ch-1");
    assert_eq!(got.question_count, 5);
  }

  #[tokio::test]
  async fn typed_receiver_skips_malformed_payloads() {
    let events = TypedEvents::new();
    let (_sub, mut rx) = events.subscribe_points_updated();
    events.bus().emit(POINTS_UPDATED, json!("not an object"));
    events.emit_points_updated(PointsUpdated {
      user_id: "u".into(),
      old_points: 0,
      new_points: 10,
      reason: "CHAPTER_COMPLETION".into(),
      timestamp: 1,
    });
    let got = rx.recv().await.unwrap();
    assert_eq!(got.new_points, 10);
  }
}
