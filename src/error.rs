use actix_web::{
    HttpRequest, HttpResponse, ResponseError,
    error::{JsonPayloadError, QueryPayloadError},
    http::StatusCode,
    web,
};
use serde_json::json;
use sqlx::error::DatabaseError;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Failures raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call `{operation}` timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("concurrent write collided: {0}")]
    Conflict(String),

    #[error("duplicate record")]
    Duplicate,

    #[error("{0} not found")]
    NotFound(String),

    #[error("stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("local store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("local store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// MySQL deadlock (1213) and lock wait timeout (1205) are safe to retry.
    pub fn from_sqlx(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if let Some(mysql) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                match mysql.number() {
                    1213 | 1205 => return StoreError::Conflict(mysql.message().to_string()),
                    1062 => return StoreError::Duplicate,
                    _ => {}
                }
            }
            if db_err.code().as_deref() == Some("23000") {
                return StoreError::Duplicate;
            }
        }
        StoreError::Database(e)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout { .. } | StoreError::Conflict(_))
    }
}

/// Error taxonomy shared by the services and the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Delivery(String),

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            StoreError::Conflict(_) => AppError::Conflict(
                "Another submission for the same class and date is in progress, retry".to_string(),
            ),
            other => AppError::Store(other),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Delivery(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Store(e) => {
                error!(error = %e, "Store failure");
                if e.is_retryable() {
                    json!({
                        "status": "error",
                        "message": "The data store did not respond in time, please retry",
                        "retryable": true
                    })
                } else {
                    json!({"status": "error", "message": "Internal server error"})
                }
            }
            AppError::Internal(detail) => {
                error!(error = %detail, "Internal failure");
                json!({"status": "error", "message": "Internal server error"})
            }
            other => json!({"status": "error", "message": other.to_string()}),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Malformed JSON bodies get the same envelope as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        AppError::Validation(format!("Invalid request body: {err}")).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err: QueryPayloadError, _req: &HttpRequest| {
        AppError::Validation(format!("Invalid query string: {err}")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn timeout_is_reported_as_retryable_500() {
        let err = AppError::from(StoreError::Timeout {
            operation: "replace_attendance",
            elapsed: Duration::from_millis(50),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["retryable"], true);
    }

    #[actix_web::test]
    async fn database_detail_is_not_leaked() {
        let err = AppError::from(StoreError::Corrupt("status column holds 'tardy'".into()));
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "Internal server error");
        assert!(value.get("retryable").is_none());
    }

    #[test]
    fn missing_class_maps_to_404() {
        let err = AppError::from(StoreError::NotFound("class C9".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "class C9 not found");
    }
}
