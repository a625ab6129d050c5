use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Errors returned from handlers. Messages are static; details are logged
/// where the error is mapped.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(&'static str),
    Forbidden(&'static str),
    Internal(&'static str),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            HttpError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}
