use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::auth::AuthError;
use crate::service::BookingError;

/// Everything a handler can fail with, rendered as `{ error, message, field? }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(AuthError),
    Booking(BookingError),
    /// The request could not be read: bad JSON, bad query string, bad id.
    BadRequest { field: &'static str, message: String },
    NotFound(String),
    Overloaded,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl ApiError {
    pub fn bad_request(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            field,
            message: message.into(),
        }
    }

    fn parts(&self) -> (StatusCode, &'static str, Option<&'static str>) {
        match self {
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated", None),
            ApiError::BadRequest { field, .. } => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(*field))
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            ApiError::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, "overloaded", None),
            ApiError::Booking(e) => match e {
                BookingError::Validation { field, .. } => {
                    (StatusCode::BAD_REQUEST, "validation_error", Some(*field))
                }
                BookingError::Conflict { .. } => (StatusCode::BAD_REQUEST, "conflict", None),
                BookingError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden", None),
                BookingError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
                BookingError::InvalidTransition { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_transition", None)
                }
                BookingError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthenticated(e) => e.to_string(),
            ApiError::BadRequest { message, .. } => message.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::Overloaded => "too many concurrent requests".into(),
            // Internal details stay in the log.
            ApiError::Booking(BookingError::Store(_)) => "internal storage error".into(),
            ApiError::Booking(e) => e.to_string(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Booking(e) => e.fmt(f),
            other => f.write_str(&other.message()),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, field) = self.parts();
        if let ApiError::Booking(BookingError::Store(e)) = &self {
            tracing::error!("store failure: {e}");
        }
        let body = ErrorBody {
            error,
            message: self.message(),
            field,
        };
        (status, Json(body)).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        ApiError::Booking(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Unauthenticated(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request("body", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request("query", rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusKind;
    use ulid::Ulid;

    #[test]
    fn status_codes() {
        let cases = [
            (ApiError::Unauthenticated(AuthError::MissingToken), StatusCode::UNAUTHORIZED),
            (
                BookingError::validation("attendees", "too few").into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                BookingError::Conflict { holder: None, message: "taken".into() }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                BookingError::Forbidden { action: "approve" }.into(),
                StatusCode::FORBIDDEN,
            ),
            (BookingError::NotFound(Ulid::new()).into(), StatusCode::NOT_FOUND),
            (
                BookingError::InvalidTransition {
                    from: StatusKind::Cancelled,
                    to: StatusKind::Cancelled,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                BookingError::Store(crate::engine::EngineError::WalError("disk".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::Overloaded, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn store_details_are_not_leaked() {
        let err = ApiError::from(BookingError::Store(crate::engine::EngineError::WalError(
            "/var/lib/aula/bookings.wal: disk full".into(),
        )));
        assert_eq!(err.message(), "internal storage error");
    }

    #[test]
    fn validation_names_field() {
        let err = ApiError::from(BookingError::validation("endTime", "bad"));
        assert_eq!(err.parts().2, Some("endTime"));
    }
}
