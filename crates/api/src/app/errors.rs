use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use precinct_auth::CredentialError;
use precinct_core::DomainError;
use precinct_infra::{DirectoryError, SessionStoreError};

/// Handler-level failure, rendered as `{ "error": code, "message": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login failed. Unknown badge, wrong password and inactive account look the same.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Any refresh-family failure; the client must log in again.
    #[error("re-authentication required")]
    Reauthenticate,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    /// Persistence is down; safe to retry reads.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::InvalidCredentials => {
                json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "invalid credentials")
            }
            ApiError::Reauthenticate => json_error(
                StatusCode::UNAUTHORIZED,
                "reauthenticate",
                "session is no longer valid; please log in again",
            ),
            ApiError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
            ApiError::Unavailable(detail) => {
                warn!(%detail, "dependency unavailable");
                json_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "service temporarily unavailable",
                )
            }
            ApiError::Internal(detail) => {
                error!(%detail, "internal error");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
            }
        }
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            e if e.requires_reauthentication() => ApiError::Reauthenticate,
            SessionStoreError::NotFound(_) => ApiError::NotFound,
            SessionStoreError::Storage(msg) => ApiError::Unavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Storage(msg) => ApiError::Unavailable(msg),
            DirectoryError::Corrupt(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        ApiError::Internal(format!("credential issuance failed: {err}"))
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound => ApiError::NotFound,
            other => ApiError::Validation(other.to_string()),
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use precinct_core::SessionId;

    #[test]
    fn refresh_family_maps_to_reauthenticate() {
        for e in [
            SessionStoreError::InvalidRefreshToken,
            SessionStoreError::RefreshExpired,
            SessionStoreError::SessionExpired,
            SessionStoreError::DeviceMismatch,
        ] {
            assert!(matches!(ApiError::from(e), ApiError::Reauthenticate));
        }
    }

    #[test]
    fn status_codes() {
        let status = |e: ApiError| e.into_response().status();
        assert_eq!(status(ApiError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(ApiError::from(SessionStoreError::NotFound(SessionId::new()))), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ApiError::from(SessionStoreError::Storage("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(ApiError::InvalidCredentials), StatusCode::UNAUTHORIZED);
    }
}
