//! Error taxonomy for the HTTP surface.
//!
//! Four families (mirrored in the response status):
//! - client input errors  -> 400, rejected before any state mutation
//! - missing resources    -> 404
//! - collaborator (AI) failures -> 502
//! - storage failures     -> 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  NotFound(String),
  #[error("AI collaborator failed: {0}")]
  Collaborator(String),
  #[error(transparent)]
  Store(#[from] StoreError),
}

impl AppError {
  fn status(&self) -> StatusCode {
    match self {
      AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Collaborator(_) => StatusCode::BAD_GATEWAY,
      AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(target: "kurso_backend", error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn statuses_match_families() {
    assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    assert_eq!(AppError::Collaborator("x".into()).status(), StatusCode::BAD_GATEWAY);
  }
}
