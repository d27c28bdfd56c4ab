//! JSend envelopes for every API response.
//!
//! - `success`: `{"status":"success","data":…}`
//! - `fail` (4xx): `{"status":"fail","data":{"message":…}}`; conflicts add
//!   `error` and `existing_file`
//! - `error` (5xx): `{"status":"error","message":…}`

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JSendStatus {
    Error,
    Fail,
    Success,
}

// ============================================================================
// Success
// ============================================================================

#[derive(Debug, Serialize)]
pub struct JSend<T: Serialize> {
    pub status: JSendStatus,
    pub data: T,
}

impl<T: Serialize> JSend<T> {
    pub fn success(data: T) -> Json<JSend<T>> {
        Json(JSend {
            status: JSendStatus::Success,
            data,
        })
    }
}

/// One window of a listing plus where it sits in the whole.
#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageInfo {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

impl<T: Serialize> Page<T> {
    /// Cut `limit` rows starting at `offset` out of `rows`, converting each.
    pub fn window<R>(rows: &[R], limit: u32, offset: u32, convert: impl Fn(&R) -> T) -> Self {
        let items = rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(convert)
            .collect();
        Page {
            items,
            pagination: PageInfo {
                limit,
                offset,
                total: rows.len() as u64,
            },
        }
    }
}

// ============================================================================
// Fail / error
// ============================================================================

/// A handler failure. 4xx statuses render as JSend `fail`, everything else as
/// JSend `error`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    /// Stored file a conflicting request collided with.
    existing_file: Option<String>,
}

#[derive(Serialize)]
struct FailBody<'a> {
    status: JSendStatus,
    data: FailData<'a>,
}

#[derive(Serialize)]
struct FailData<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    existing_file: Option<&'a str>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: JSendStatus,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            existing_file: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn conflict(message: impl Into<String>, existing_file: impl Into<String>) -> Self {
        Self {
            existing_file: Some(existing_file.into()),
            ..Self::new(StatusCode::CONFLICT, message)
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            let body = FailBody {
                status: JSendStatus::Fail,
                data: FailData {
                    message: &self.message,
                    error: self.existing_file.as_ref().map(|_| self.message.as_str()),
                    existing_file: self.existing_file.as_deref(),
                },
            };
            (self.status, Json(body)).into_response()
        } else {
            let body = ErrorBody {
                status: JSendStatus::Error,
                message: &self.message,
            };
            (self.status, Json(body)).into_response()
        }
    }
}

// ============================================================================
// Extractors that reject with JSend bodies
// ============================================================================

/// `axum::Json` whose rejections are JSend `fail` responses.
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| AppJson(value))
            .map_err(|rejection| ApiError::bad_request(json_rejection_message(&rejection)))
    }
}

fn json_rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::JsonDataError(err) => format!("Invalid request body: {}", err.body_text()),
        JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".into(),
        JsonRejection::MissingJsonContentType(_) => {
            "Missing Content-Type: application/json header".into()
        }
        _ => "Failed to read request body".into(),
    }
}

/// Query-string extractor backed by serde_qs.
pub struct AppQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        serde_qs::from_str(parts.uri.query().unwrap_or_default())
            .map(AppQuery)
            .map_err(|e| ApiError::bad_request(query_error_message(&e.to_string())))
    }
}

/// serde reports integer fields by Rust type name; say what the client sent wrong.
fn query_error_message(raw: &str) -> String {
    let readable = raw
        .replace("u32", "non-negative integer")
        .replace("u64", "non-negative integer")
        .replace("i64", "integer");
    format!("Invalid query parameter: {readable}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window() {
        let rows: Vec<u32> = (0..10).collect();
        let page = Page::window(&rows, 3, 8, |n| n * 10);
        assert_eq!(page.items, vec![80, 90]);
        assert_eq!(page.pagination.total, 10);

        let empty = Page::window(&rows, 5, 20, |n| *n);
        assert!(empty.items.is_empty());
    }

    #[test]
    fn client_errors_render_as_fail() {
        assert_eq!(ApiError::conflict("dup", "a.png").status(), StatusCode::CONFLICT);
        let response = ApiError::conflict("dup", "a.png").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = ApiError::internal("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
