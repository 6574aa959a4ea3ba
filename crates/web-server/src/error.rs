use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use database::DbError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Converts our custom `AppError` into an HTTP response.
///
/// Database failures are logged in full but answered with a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(DbError::NotFound) => {
                (StatusCode::NOT_FOUND, "The requested resource was not found".to_string())
            }
            AppError::Database(db_err @ DbError::NotConnected(_)) => {
                tracing::error!(error = ?db_err, "Database unavailable.");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The database is currently unavailable".to_string(),
                )
            }
            AppError::Database(db_err) => {
                tracing::error!(error = ?db_err, kind = %db_err.kind(), "Database error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::{ConnectionState, ErrorKind};

    #[test]
    fn internal_details_never_reach_the_body() {
        let err = AppError::from(DbError::operation(ErrorKind::Fatal, "relation \"plants\" does not exist"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_and_unavailable_have_their_own_status() {
        assert_eq!(
            AppError::from(DbError::NotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(DbError::NotConnected(ConnectionState::Failed))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
