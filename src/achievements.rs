//! Achievement definitions and the unlock check.
//!
//! The check runs after a successful progression: it reads aggregate learner
//! stats once, walks the static definition table, unlocks anything newly
//! earned, awards the achievement's points through the ledger, and announces
//! each unlock on the event bus. Unlocks are unique per (user, achievement).

use tracing::{info, instrument};

use crate::domain::{
  AchievementCategory, AchievementCondition, AchievementDef, PointsReason,
};
use crate::error::AppError;
use crate::events::{now_millis, AchievementUnlocked};
use crate::points::apply_points;
use crate::state::AppState;

pub fn definitions() -> &'static [AchievementDef] {
  use AchievementCategory::*;
  use AchievementCondition::*;
  static DEFS: &[AchievementDef] = &[
    AchievementDef { id: "first-course", name: "First Steps", description: "Complete your first course", icon: "🎓", category: Course, condition: CompleteCourses(1), points: 50 },
    AchievementDef { id: "five-courses", name: "Course Collector", description: "Complete 5 courses", icon: "📚", category: Course, condition: CompleteCourses(5), points: 150 },
    AchievementDef { id: "ten-courses", name: "Scholar", description: "Complete 10 courses", icon: "🏛️", category: Course, condition: CompleteCourses(10), points: 300 },
    AchievementDef { id: "fifty-chapters", name: "Page Turner", description: "Pass 50 chapters", icon: "📖", category: Chapter, condition: CompleteChapters(50), points: 100 },
    AchievementDef { id: "hundred-chapters", name: "Bookworm", description: "Pass 100 chapters", icon: "🐛", category: Chapter, condition: CompleteChapters(100), points: 250 },
    AchievementDef { id: "points-1000", name: "Point Hoarder", description: "Earn 1000 points", icon: "💰", category: Points, condition: EarnPoints(1000), points: 50 },
    AchievementDef { id: "points-5000", name: "Point Tycoon", description: "Earn 5000 points", icon: "💎", category: Points, condition: EarnPoints(5000), points: 200 },
    AchievementDef { id: "level-10", name: "Rising Star", description: "Reach level 10", icon: "⭐", category: Level, condition: ReachLevel(10), points: 100 },
    AchievementDef { id: "level-25", name: "Luminary", description: "Reach level 25", icon: "🌟", category: Level, condition: ReachLevel(25), points: 300 },
    AchievementDef { id: "perfect-10", name: "Perfectionist", description: "Score 100 ten times", icon: "🎯", category: Mastery, condition: PerfectScores(10), points: 200 },
    AchievementDef { id: "streak-7", name: "Week Warrior", description: "Learn 7 days in a row", icon: "🔥", category: Streak, condition: StreakDays(7), points: 75 },
    AchievementDef { id: "streak-30", name: "Iron Habit", description: "Learn 30 days in a row", icon: "🛡️", category: Streak, condition: StreakDays(30), points: 300 },
  ];
  DEFS
}

/// Check every definition against current stats; unlock what is newly earned.
/// Returns the unlocked definitions. Award points do not re-trigger the check
/// (no recursion); the next check picks up threshold crossings.
#[instrument(level = "info", skip(state), fields(%user_id))]
pub async fn check_and_unlock(
  state: &AppState,
  user_id: &str,
) -> Result<Vec<&'static AchievementDef>, AppError> {
  let points = state.store.get_or_create_points(user_id).await;
  let completed_courses = state.store.count_completed_courses(user_id).await;
  let passed_chapters = state.store.count_passed_assessments(user_id).await;
  let perfect_scores = state.store.count_perfect_assessments(user_id).await;

  let mut unlocked = Vec::new();
  for def in definitions() {
    if state.store.has_achievement(user_id, def.id).await {
      continue;
    }
    let earned = match def.condition {
      AchievementCondition::CompleteCourses(n) => completed_courses >= n,
      AchievementCondition::CompleteChapters(n) => passed_chapters >= n,
      AchievementCondition::EarnPoints(n) => points.total_points >= n,
      AchievementCondition::ReachLevel(n) => points.level >= n,
      AchievementCondition::PerfectScores(n) => perfect_scores >= n,
      AchievementCondition::StreakDays(n) => points.streak >= n,
    };
    if !earned {
      continue;
    }

    state.store.insert_achievement(user_id, def.id).await;
    if def.points > 0 {
      apply_points(
        state,
        user_id,
        def.points,
        PointsReason::AchievementUnlock,
        Some(format!("Achievement unlocked: {}", def.name)),
      )
      .await?;
    }
    state.events.emit_achievement_unlocked(AchievementUnlocked {
      user_id: user_id.to_string(),
      achievement_id: def.id.to_string(),
      achievement_title: def.name.to_string(),
      points: def.points,
      timestamp: now_millis(),
    });
    info!(target: "kurso_backend", %user_id, achievement = def.id, "achievement unlocked");
    unlocked.push(def);
  }
  Ok(unlocked)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::UserPoints;

  #[tokio::test]
  async fn unlocks_points_threshold_once() {
    let state = AppState::for_tests();
    let mut p = UserPoints::fresh("u");
    p.total_points = 1200;
    state.store.save_points(p).await;

    let first = check_and_unlock(&state, "u").await.unwrap();
    assert!(first.iter().any(|d| d.id == "points-1000"));

    let second = check_and_unlock(&state, "u").await.unwrap();
    assert!(!second.iter().any(|d| d.id == "points-1000"));
  }

  #[tokio::test]
  async fn unlock_awards_points_and_emits_event() {
    let state = AppState::for_tests();
    let (_sub, mut rx) = state.events.subscribe_achievement_unlocked();
    let mut p = UserPoints::fresh("u");
    p.streak = 7;
    state.store.save_points(p).await;

    let unlocked = check_and_unlock(&state, "u").await.unwrap();
    assert_eq!(unlocked.len(), 1);
    assert_eq!(unlocked[0].id, "streak-7");

    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.achievement_id, "streak-7");
    assert_eq!(ev.points, 75);

    let rows = state.store.history_for("u", 10).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason, PointsReason::AchievementUnlock);
  }

  #[tokio::test]
  async fn nothing_unlocks_for_a_fresh_user() {
    let state = AppState::for_tests();
    let unlocked = check_and_unlock(&state, "nobody").await.unwrap();
    assert!(unlocked.is_empty());
  }
}
