//! HTTP mapping for the error taxonomy.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use brain_core::Error;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
  pub error: &'static str,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hint: Option<String>,
}

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
  fn from(e: Error) -> Self {
    ApiError(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, kind, hint) = match &self.0 {
      Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation", None),
      Error::QueueFull { .. } => (
        StatusCode::TOO_MANY_REQUESTS,
        "queue_full",
        Some("wait for pending jobs to drain or cancel one".to_string()),
      ),
      Error::ProviderMismatch { .. } => (
        StatusCode::CONFLICT,
        "provider_mismatch",
        Some("re-index with force=true to reset the stored embedding metadata".to_string()),
      ),
      Error::BackendUnsupported { required, .. } => (
        StatusCode::UNPROCESSABLE_ENTITY,
        "backend_unsupported",
        Some(format!("switch the storage backend to {}", required)),
      ),
      Error::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration", None),
      Error::JobTimeout { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "job_timeout", None),
      Error::Provider(_) => (StatusCode::BAD_GATEWAY, "provider", None),
      Error::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "storage", None),
      Error::Io(_) | Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", None),
    };

    let body = ErrorBody {
      error: kind,
      message: self.0.to_string(),
      hint,
    };

    (status, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use brain_core::BackendKind;

  use super::*;

  #[test]
  fn test_unsupported_maps_to_422_with_hint() {
    let err = ApiError(Error::BackendUnsupported {
      operation: "graph search",
      backend: BackendKind::Relational,
      required: BackendKind::Embedded,
    });
    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
  }

  #[test]
  fn test_queue_full_maps_to_429() {
    let err = ApiError(Error::QueueFull { pending: 128, max: 128 });
    assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
  }

  #[test]
  fn test_validation_maps_to_400() {
    let err = ApiError(Error::Validation("bad".into()));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
  }
}
