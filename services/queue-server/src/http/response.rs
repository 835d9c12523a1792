//! Uniform JSON error envelope, grounded in the teacher's
//! `http/response.rs` `json_error`/`not_found`/`bad_request` helpers —
//! reused here in shape, generalized to this service's error codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use queue_protocol::HttpErrorEnvelope;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub(crate) fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

pub fn forbidden(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message)
}

pub fn internal_error(err: impl std::fmt::Display) -> HttpResponse {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error_response(response: Response, expected_status: StatusCode, expected_code: &str) {
        assert_eq!(response.status(), expected_status);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let envelope: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.code, expected_code);
    }

    #[tokio::test]
    async fn not_found_sets_status_and_code() {
        assert_error_response(not_found("ticket 5 not found"), StatusCode::NOT_FOUND, "NOT_FOUND").await;
    }

    #[tokio::test]
    async fn internal_error_sets_500() {
        assert_error_response(internal_error("boom"), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR").await;
    }

    #[tokio::test]
    async fn forbidden_sets_403() {
        assert_error_response(forbidden("not your ticket"), StatusCode::FORBIDDEN, "FORBIDDEN").await;
    }
}
