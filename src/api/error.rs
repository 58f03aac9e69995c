//! Maps [`EngineError`] onto HTTP status codes for the external surface
//! (spec §7's error taxonomy projected onto §6's endpoint contract).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::domain::EngineError;

use super::dto::ErrorResponse;

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::JobNotFound(_) | EngineError::UnitNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::UnknownWorkflow(_) | EngineError::UnknownPhase(_) => StatusCode::NOT_FOUND,
            EngineError::NotAwaitingConfirmation(_) | EngineError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            EngineError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::CycleDetected(_) | EngineError::UnreachablePhase(_) | EngineError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EngineError::PhaseFailed { .. } | EngineError::ActivityTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::LockUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::StateStore(_) | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Cancelled(_) => StatusCode::CONFLICT,
        };
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_not_found_maps_to_404() {
        let response = ApiError::from(EngineError::JobNotFound("j1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_awaiting_confirmation_maps_to_409() {
        let response = ApiError::from(EngineError::NotAwaitingConfirmation("j1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn lock_unavailable_maps_to_503() {
        let response = ApiError::from(EngineError::LockUnavailable("j1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
