use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use badgesync_core::SyncError;

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<SyncError>() {
            match e {
                SyncError::InvalidInterval(_) => StatusCode::BAD_REQUEST,
                SyncError::Authentication(_) => StatusCode::BAD_GATEWAY,
                SyncError::Step { .. } | SyncError::Transport(_) | SyncError::Sqlite(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
