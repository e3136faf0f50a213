use std::sync::OnceLock;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use murmur_types::ChatError;

static SERVICE_NAME: OnceLock<String> = OnceLock::new();

/// Name reported in the `service` field of error bodies. First call wins.
pub fn init_service_name(name: impl Into<String>) {
    let _ = SERVICE_NAME.set(name.into());
}

fn service_name() -> &'static str {
    SERVICE_NAME.get().map(String::as_str).unwrap_or("murmur")
}

/// HTTP face of a [`ChatError`].
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ChatError::BadInput(_) | ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "success": false,
            "message": self.0.message(),
            "httpStatusCode": status.as_u16(),
            "error": self.0.kind().to_uppercase(),
            "service": service_name(),
        });
        (status, Json(body)).into_response()
    }
}
