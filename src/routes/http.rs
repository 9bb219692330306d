//! REST handlers: courses, chapters, questions, answers, progression,
//! points and achievements.
//!
//! Callers identify themselves with an explicit `userId` (authentication is
//! handled upstream of this service). Every handler returns
//! `Result<_, AppError>`; failure bodies are `{"error": ...}` JSON.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::achievements;
use crate::ai::QuestionRequest;
use crate::domain::ChapterQuestion;
use crate::error::AppError;
use crate::events::{now_millis, ChapterContentGenerated, ChapterQuestionsReady};
use crate::points;
use crate::progression;
use crate::protocol::*;
use crate::state::AppState;

pub async fn health() -> Json<HealthOut> {
  Json(HealthOut { ok: true })
}

// ----- courses -----

#[instrument(level = "info", skip(state, body), fields(title = %body.title, chapters = body.chapters.len()))]
pub async fn create_course(
  State(state): State<Arc<AppState>>,
  Json(body): Json<CreateCourseIn>,
) -> Result<Json<CourseOut>, AppError> {
  if body.title.trim().is_empty() {
    return Err(AppError::BadRequest("course title must not be empty".into()));
  }
  if body.chapters.is_empty() {
    return Err(AppError::BadRequest("a course needs at least one chapter".into()));
  }
  let outline: Vec<(String, String)> = body
    .chapters
    .into_iter()
    .map(|c| (c.title, c.description))
    .collect();
  let (course, chapters) = state.store.create_course(&body.title, &body.description, &outline).await;
  info!(target: "kurso_backend", course_id = %course.id, chapters = chapters.len(), "course created");
  Ok(Json(CourseOut { course, chapters }))
}

#[instrument(level = "debug", skip(state))]
pub async fn get_course(
  State(state): State<Arc<AppState>>,
  Path(course_id): Path<String>,
) -> Result<Json<CourseOut>, AppError> {
  let course = state
    .store
    .course(&course_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("course {course_id} not found")))?;
  let chapters = state.store.chapters_of_course(&course_id).await;
  Ok(Json(CourseOut { course, chapters }))
}

/// Enroll a user: course progress goes IN_PROGRESS and chapter 1 unlocks.
/// Re-enrolling changes nothing.
#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn enroll(
  State(state): State<Arc<AppState>>,
  Path(course_id): Path<String>,
  Json(body): Json<UserIn>,
) -> Result<Json<CourseProgressOut>, AppError> {
  if state.store.course(&course_id).await.is_none() {
    return Err(AppError::NotFound(format!("course {course_id} not found")));
  }
  let course = state.store.enroll(&body.user_id, &course_id).await;
  if let Some(first) = state.store.chapter_by_number(&course_id, 1).await {
    state.store.mark_unlocked(&body.user_id, &course_id, &first.id).await;
  }
  let chapters = state.store.course_chapter_progress(&body.user_id, &course_id).await;
  Ok(Json(CourseProgressOut { course, chapters }))
}

#[instrument(level = "debug", skip(state, query), fields(user_id = %query.user_id))]
pub async fn course_progress(
  State(state): State<Arc<AppState>>,
  Path(course_id): Path<String>,
  Query(query): Query<UserQuery>,
) -> Result<Json<CourseProgressOut>, AppError> {
  let course = state
    .store
    .course_progress(&query.user_id, &course_id)
    .await
    .ok_or_else(|| AppError::NotFound("user is not enrolled in this course".into()))?;
  let chapters = state.store.course_chapter_progress(&query.user_id, &course_id).await;
  Ok(Json(CourseProgressOut { course, chapters }))
}

// ----- questions & answers -----

/// Get-or-generate the chapter's question set. A stored set is returned as-is
/// (`source: "existing"`); otherwise the generation collaborator produces one,
/// the set is persisted and `chapter:questions:ready` is announced so any
/// waiting readiness stream resolves.
#[instrument(level = "info", skip(state, query), fields(user_id = %query.user_id))]
pub async fn chapter_questions(
  State(state): State<Arc<AppState>>,
  Path(chapter_id): Path<String>,
  Query(query): Query<UserQuery>,
) -> Result<Json<QuestionsOut>, AppError> {
  let chapter = state
    .store
    .chapter(&chapter_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("chapter {chapter_id} not found")))?;

  let existing = state.store.questions_for_chapter(&chapter_id).await;
  let (questions, source) = if existing.is_empty() {
    let generator = state
      .generator
      .as_ref()
      .ok_or_else(|| AppError::Collaborator("question generation service unavailable".into()))?;
    let course = state
      .store
      .course(&chapter.course_id)
      .await
      .ok_or_else(|| AppError::NotFound(format!("course {} not found", chapter.course_id)))?;
    let generated = generator
      .generate_questions(&QuestionRequest {
        course_title: course.title,
        chapter_title: chapter.title.clone(),
        chapter_content: chapter.content_md.clone().unwrap_or_else(|| chapter.description.clone()),
        level: "intermediate".into(),
      })
      .await
      .map_err(|e| AppError::Collaborator(e.to_string()))?;

    let set: Vec<ChapterQuestion> = generated
      .into_iter()
      .map(|q| ChapterQuestion {
        id: Uuid::new_v4().to_string(),
        chapter_id: chapter_id.clone(),
        question_number: q.question_number,
        question_text: q.question_text,
        question_type: q.question_type,
        question_category: q.question_category,
        difficulty: q.difficulty,
        hints: q.hints,
        options: q.options,
      })
      .collect();
    state.store.replace_questions(&chapter_id, set.clone()).await;
    info!(target: "kurso_backend", chapter_id = %chapter_id, count = set.len(), "question set generated");
    state.events.emit_chapter_questions_ready(ChapterQuestionsReady {
      chapter_id: chapter_id.clone(),
      question_count: set.len(),
      timestamp: now_millis(),
    });
    (set, "generated")
  } else {
    (existing, "existing")
  };

  let mut out = Vec::with_capacity(questions.len());
  for q in questions {
    let user_answer = state.store.answer(&query.user_id, &q.id).await;
    out.push(QuestionWithAnswerOut { question: q, user_answer });
  }
  Ok(Json(QuestionsOut { chapter_id, source, questions: out }))
}

/// Generate (or return) the chapter's markdown body. `regenerate: true`
/// forces a fresh collaborator call even when content exists.
#[instrument(level = "info", skip(state, body))]
pub async fn generate_content(
  State(state): State<Arc<AppState>>,
  Path(chapter_id): Path<String>,
  Json(body): Json<GenerateContentIn>,
) -> Result<Json<ContentOut>, AppError> {
  let chapter = state
    .store
    .chapter(&chapter_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("chapter {chapter_id} not found")))?;

  if let Some(content) = chapter.content_md.clone() {
    if !body.regenerate {
      return Ok(Json(ContentOut { chapter_id, content_md: content }));
    }
  }

  let generator = state
    .content
    .as_ref()
    .ok_or_else(|| AppError::Collaborator("content generation service unavailable".into()))?;
  let course = state
    .store
    .course(&chapter.course_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("course {} not found", chapter.course_id)))?;
  let content = generator
    .generate_content(&course.title, &chapter.title, &chapter.description)
    .await
    .map_err(|e| AppError::Collaborator(e.to_string()))?;

  state.store.set_chapter_content(&chapter_id, &content).await;
  info!(target: "kurso_backend", chapter_id = %chapter_id, length = content.len(), "chapter content generated");
  state.events.emit_chapter_content_generated(ChapterContentGenerated {
    chapter_id: chapter_id.clone(),
    content_length: content.len(),
    timestamp: now_millis(),
  });
  Ok(Json(ContentOut { chapter_id, content_md: content }))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id, question_id = %body.question_id))]
pub async fn submit_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SubmitAnswerIn>,
) -> Result<Json<SubmitAnswerOut>, AppError> {
  if state.store.question(&body.question_id).await.is_none() {
    return Err(AppError::NotFound(format!("question {} not found", body.question_id)));
  }
  let answer = state
    .store
    .upsert_raw_answer(&body.user_id, &body.question_id, &body.answer)
    .await;
  Ok(Json(SubmitAnswerOut { answer }))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id, chapter_id = %body.chapter_id))]
pub async fn evaluate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<EvaluateIn>,
) -> Result<Json<AssessmentOut>, AppError> {
  let out = progression::evaluate_chapter(&state, &body).await?;
  Ok(Json(out))
}

// ----- points -----

#[instrument(level = "debug", skip(state, query), fields(user_id = %query.user_id))]
pub async fn get_points(
  State(state): State<Arc<AppState>>,
  Query(query): Query<UserQuery>,
) -> Result<Json<PointsOut>, AppError> {
  let points = state.store.get_or_create_points(&query.user_id).await;
  let recent_history = state.store.history_for(&query.user_id, 10).await;
  Ok(Json(PointsOut { points, recent_history }))
}

#[instrument(level = "debug", skip(state, query), fields(user_id = %query.user_id))]
pub async fn points_history(
  State(state): State<Arc<AppState>>,
  Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryOut>, AppError> {
  let history = state.store.history_for(&query.user_id, query.limit.unwrap_or(50)).await;
  Ok(Json(HistoryOut { history }))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn update_streak(
  State(state): State<Arc<AppState>>,
  Json(body): Json<UserIn>,
) -> Result<Json<StreakOut>, AppError> {
  let outcome = points::update_streak(&state, &body.user_id).await?;
  Ok(Json(StreakOut { streak: outcome.streak, bonus_points: outcome.bonus_points }))
}

#[instrument(level = "debug", skip(state, query))]
pub async fn leaderboard(
  State(state): State<Arc<AppState>>,
  Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardOut>, AppError> {
  let by_level = match query.by.as_deref() {
    None | Some("points") => false,
    Some("level") => true,
    Some(other) => {
      return Err(AppError::BadRequest(format!("unknown leaderboard ordering: {other}")));
    }
  };
  let leaderboard = state.store.leaderboard(by_level, query.limit.unwrap_or(10)).await;
  let user_rank = match query.user_id {
    Some(ref user_id) => Some(state.store.rank_of(user_id, by_level).await),
    None => None,
  };
  Ok(Json(LeaderboardOut { leaderboard, user_rank }))
}

// ----- achievements & assessments -----

#[instrument(level = "debug", skip(state, query), fields(user_id = %query.user_id))]
pub async fn list_achievements(
  State(state): State<Arc<AppState>>,
  Query(query): Query<UserQuery>,
) -> Result<Json<Vec<AchievementOut>>, AppError> {
  let unlocked = state.store.achievements_of(&query.user_id).await;
  let out = achievements::definitions()
    .iter()
    .map(|def| {
      let unlock = unlocked.iter().find(|u| u.achievement_id == def.id);
      AchievementOut {
        id: def.id,
        name: def.name,
        description: def.description,
        icon: def.icon,
        category: def.category,
        points: def.points,
        is_unlocked: unlock.is_some(),
        unlocked_at: unlock.map(|u| u.unlocked_at),
      }
    })
    .collect();
  Ok(Json(out))
}

#[instrument(level = "debug", skip(state, query), fields(user_id = %query.user_id))]
pub async fn list_assessments(
  State(state): State<Arc<AppState>>,
  Query(query): Query<AssessmentsQuery>,
) -> Result<Json<AssessmentsOut>, AppError> {
  let assessments = state
    .store
    .assessments_for(&query.user_id, query.chapter_id.as_deref(), query.course_id.as_deref())
    .await;
  Ok(Json(AssessmentsOut { assessments }))
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use async_trait::async_trait;
  use axum::body::Body;
  use axum::http::{header, Request, StatusCode};
  use http_body_util::BodyExt;
  use serde_json::{json, Value};
  use tower::ServiceExt;

  use super::*;
  use crate::ai::{
    AnswerEvaluation, AnswerEvaluator, AnswerToEvaluate, CollabError, GeneratedQuestion,
    QuestionGenerator,
  };
  use crate::routes::router;

  struct CountingGenerator {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl QuestionGenerator for CountingGenerator {
    async fn generate_questions(
      &self,
      req: &QuestionRequest,
    ) -> Result<Vec<GeneratedQuestion>, CollabError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(
        (1..=3)
          .map(|n| GeneratedQuestion {
            question_number: n,
            question_text: format!("About {}: question {}", req.chapter_title, n),
            question_type: "open".into(),
            question_category: "comprehension".into(),
            difficulty: "medium".into(),
            hints: vec![],
            options: None,
          })
          .collect(),
      )
    }
  }

  struct PassEvaluator;

  #[async_trait]
  impl AnswerEvaluator for PassEvaluator {
    async fn evaluate_batch(
      &self,
      _level: &str,
      items: &[AnswerToEvaluate],
    ) -> Result<Vec<AnswerEvaluation>, CollabError> {
      Ok(
        items
          .iter()
          .map(|i| AnswerEvaluation {
            question_id: i.question_id.clone(),
            score: 90,
            is_correct: true,
            feedback: "solid".into(),
            suggestions: vec![],
          })
          .collect(),
      )
    }
  }

  async fn request(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() { json!(null) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
  }

  fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
  }

  async fn create_two_chapter_course(app: &axum::Router) -> Value {
    let (status, body) = request(
      app.clone(),
      post(
        "/api/v1/courses",
        json!({
          "title": "Rust from zero",
          "description": "an introduction",
          "chapters": [
            {"title": "Basics", "description": "syntax"},
            {"title": "Ownership", "description": "the borrow checker"}
          ]
        }),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
  }

  #[tokio::test]
  async fn course_round_trip_and_missing_course_404() {
    let app = router(AppState::for_tests());
    let created = create_two_chapter_course(&app).await;
    let id = created["id"].as_str().unwrap();
    assert_eq!(created["chapters"].as_array().unwrap().len(), 2);
    assert_eq!(created["chapters"][0]["chapterNumber"], 1);

    let (status, fetched) = request(app.clone(), get(&format!("/api/v1/courses/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Rust from zero");

    let (status, body) = request(app, get("/api/v1/courses/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
  }

  #[tokio::test]
  async fn empty_outline_is_rejected() {
    let app = router(AppState::for_tests());
    let (status, body) = request(
      app,
      post("/api/v1/courses", json!({"title": "t", "description": "d", "chapters": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("chapter"));
  }

  #[tokio::test]
  async fn enrollment_unlocks_chapter_one_idempotently() {
    let state = AppState::for_tests();
    let app = router(state.clone());
    let created = create_two_chapter_course(&app).await;
    let course_id = created["id"].as_str().unwrap();

    let (status, body) = request(
      app.clone(),
      post(&format!("/api/v1/courses/{course_id}/enroll"), json!({"userId": "u"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["course"]["status"], "IN_PROGRESS");
    assert_eq!(body["chapters"].as_array().unwrap().len(), 1);
    assert_eq!(body["chapters"][0]["status"], "UNLOCKED");

    // A second enrollment changes nothing.
    let (status, again) = request(
      app,
      post(&format!("/api/v1/courses/{course_id}/enroll"), json!({"userId": "u"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["chapters"].as_array().unwrap().len(), 1);
    assert_eq!(again["course"]["startedAt"], body["course"]["startedAt"]);
  }

  #[tokio::test]
  async fn questions_generate_once_then_serve_existing() {
    let generator = Arc::new(CountingGenerator { calls: AtomicUsize::new(0) });
    let state = AppState::for_tests().with_generator(generator.clone());
    let app = router(state.clone());
    let created = create_two_chapter_course(&app).await;
    let chapter_id = created["chapters"][0]["id"].as_str().unwrap().to_string();

    let (_sub, mut rx) = state.events.subscribe_chapter_questions_ready();

    let (status, body) = request(
      app.clone(),
      get(&format!("/api/v1/chapters/{chapter_id}/questions?userId=u")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "generated");
    assert_eq!(body["questions"].as_array().unwrap().len(), 3);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.chapter_id, chapter_id);
    assert_eq!(ev.question_count, 3);

    // Second call serves the stored set without touching the collaborator.
    let (status, body) = request(
      app,
      get(&format!("/api/v1/chapters/{chapter_id}/questions?userId=u")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "existing");
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn questions_without_a_generator_fail_explicitly() {
    let app = router(AppState::for_tests());
    let created = create_two_chapter_course(&app).await;
    let chapter_id = created["chapters"][0]["id"].as_str().unwrap();

    let (status, body) = request(
      app.clone(),
      get(&format!("/api/v1/chapters/{chapter_id}/questions?userId=u")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
  }

  #[tokio::test]
  async fn answer_upsert_requires_a_known_question() {
    let app = router(AppState::for_tests());
    let (status, _) = request(
      app,
      post(
        "/api/v1/answers",
        json!({"userId": "u", "questionId": "missing", "answer": "long enough answer"}),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn evaluation_over_http_unlocks_and_scores() {
    let generator = Arc::new(CountingGenerator { calls: AtomicUsize::new(0) });
    let state = AppState::for_tests()
      .with_generator(generator)
      .with_evaluator(Arc::new(PassEvaluator));
    let app = router(state.clone());
    let created = create_two_chapter_course(&app).await;
    let course_id = created["id"].as_str().unwrap();
    let chapter_id = created["chapters"][0]["id"].as_str().unwrap();

    request(app.clone(), post(&format!("/api/v1/courses/{course_id}/enroll"), json!({"userId": "u"}))).await;
    let (_, questions) = request(
      app.clone(),
      get(&format!("/api/v1/chapters/{chapter_id}/questions?userId=u")),
    )
    .await;
    let answers: serde_json::Map<String, Value> = questions["questions"]
      .as_array()
      .unwrap()
      .iter()
      .map(|q| (q["id"].as_str().unwrap().to_string(), json!("a thoroughly detailed answer")))
      .collect();

    let (status, body) = request(
      app.clone(),
      post(
        "/api/v1/evaluate",
        json!({"userId": "u", "chapterId": chapter_id, "answers": answers}),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["canProgress"], true);
    assert_eq!(body["totalScore"], 90);
    // max(10, 45) + 20 (average >= 90) + 10 (all correct) = 75.
    assert_eq!(body["pointsEarned"], 75);

    let (status, progress) = request(
      app.clone(),
      get(&format!("/api/v1/courses/{course_id}/progress?userId=u")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let statuses: Vec<&str> = progress["chapters"]
      .as_array()
      .unwrap()
      .iter()
      .map(|c| c["status"].as_str().unwrap())
      .collect();
    assert_eq!(statuses, vec!["COMPLETED", "UNLOCKED"]);

    let (_, points) = request(app, get("/api/v1/points?userId=u")).await;
    assert_eq!(points["totalPoints"], 75);
    assert_eq!(points["recentHistory"].as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn leaderboard_reports_rank_and_rejects_unknown_ordering() {
    let state = AppState::for_tests();
    let app = router(state.clone());
    for (user, pts) in [("a", 300), ("b", 200), ("c", 100)] {
      points::apply_points(&state, user, pts, crate::domain::PointsReason::ChapterCompletion, None)
        .await
        .unwrap();
    }

    let (status, body) = request(app.clone(), get("/api/v1/leaderboard?limit=2&userId=c")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leaderboard"].as_array().unwrap().len(), 2);
    assert_eq!(body["leaderboard"][0]["userId"], "a");
    assert_eq!(body["userRank"], 3);

    let (status, _) = request(app, get("/api/v1/leaderboard?by=karma")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn achievements_listing_joins_unlocks() {
    let state = AppState::for_tests();
    let app = router(state.clone());
    state.store.insert_achievement("u", "points-1000").await;

    let (status, body) = request(app, get("/api/v1/achievements?userId=u")).await;
    assert_eq!(status, StatusCode::OK);
    let defs = body.as_array().unwrap();
    assert_eq!(defs.len(), achievements::definitions().len());
    let hoarder = defs.iter().find(|d| d["id"] == "points-1000").unwrap();
    assert_eq!(hoarder["isUnlocked"], true);
    assert!(hoarder["unlockedAt"].is_string());
    let first = defs.iter().find(|d| d["id"] == "first-course").unwrap();
    assert_eq!(first["isUnlocked"], false);
  }
}
