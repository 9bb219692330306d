//! Points ledger: leveling arithmetic, streak bonuses, and history.
//!
//! Every application of points appends exactly one immutable ledger row and
//! then announces the new totals on the event bus. The leveling rule carries
//! overflow experience forward: while `current_exp >= exp_to_next_level`,
//! subtract the threshold, bump the level, and recompute the threshold as
//! `level * 100`.

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{PointsHistoryEntry, PointsReason};
use crate::error::AppError;
use crate::events::{now_millis, PointsUpdated};
use crate::state::AppState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointsUpdate {
  pub new_level: u32,
  pub leveled_up: bool,
}

/// Apply a points delta to a user, append the ledger row, emit the update.
#[instrument(level = "info", skip(state, description), fields(%user_id, delta, ?reason))]
pub async fn apply_points(
  state: &AppState,
  user_id: &str,
  delta: i64,
  reason: PointsReason,
  description: Option<String>,
) -> Result<PointsUpdate, AppError> {
  let mut points = state.store.get_or_create_points(user_id).await;
  let old_level = points.level;
  let old_points = points.total_points;

  points.total_points += delta;
  points.current_exp += delta;
  while points.current_exp >= points.exp_to_next_level {
    points.current_exp -= points.exp_to_next_level;
    points.level += 1;
    points.exp_to_next_level = i64::from(points.level) * 100;
  }
  points.last_active_date = Some(Utc::now());
  let new_level = points.level;
  state.store.save_points(points).await;

  state
    .store
    .append_history(PointsHistoryEntry {
      id: Uuid::new_v4().to_string(),
      user_id: user_id.to_string(),
      points_change: delta,
      reason,
      description,
      created_at: Utc::now(),
    })
    .await;

  let reason_code = serde_json::to_value(reason)
    .ok()
    .and_then(|v| v.as_str().map(str::to_string))
    .unwrap_or_default();
  state.events.emit_points_updated(PointsUpdated {
    user_id: user_id.to_string(),
    old_points,
    new_points: old_points + delta,
    reason: reason_code,
    timestamp: now_millis(),
  });

  let leveled_up = new_level > old_level;
  if leveled_up {
    info!(target: "kurso_backend", %user_id, old_level, new_level, "level up");
  }
  Ok(PointsUpdate { new_level, leveled_up })
}

#[derive(Clone, Copy, Debug)]
pub struct StreakOutcome {
  pub streak: u32,
  pub bonus_points: i64,
}

/// Update the consecutive-day learning streak and award the daily bonus.
/// Same-day repeats keep the streak and award nothing. Users with no points
/// row yet get `{streak: 0, bonus: 0}` back and no row is created for them.
#[instrument(level = "info", skip(state), fields(%user_id))]
pub async fn update_streak(state: &AppState, user_id: &str) -> Result<StreakOutcome, AppError> {
  let Some(mut points) = state.store.points_of(user_id).await else {
    return Ok(StreakOutcome { streak: 0, bonus_points: 0 });
  };
  let today = Utc::now();

  let (new_streak, bonus) = match points.last_active_date {
    Some(last) => {
      let days = (today.date_naive() - last.date_naive()).num_days();
      if days == 1 {
        let streak = points.streak + 1;
        let bonus = if streak >= 7 {
          50
        } else if streak >= 3 {
          20
        } else {
          5
        };
        (streak, bonus)
      } else if days == 0 {
        (points.streak, 0)
      } else {
        // Streak broken; restarting still earns the daily bonus.
        (1, 5)
      }
    }
    None => (1, 0),
  };

  points.streak = new_streak;
  points.last_active_date = Some(today);
  state.store.save_points(points).await;

  if bonus > 0 {
    apply_points(
      state,
      user_id,
      bonus,
      PointsReason::StreakBonus,
      Some(format!("{} day learning streak", new_streak)),
    )
    .await?;
  }

  Ok(StreakOutcome { streak: new_streak, bonus_points: bonus })
}
