// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::database::{DatabaseError, ResourceError};
use crate::filter::FilterError;
use crate::schemas::{FieldErrors, SchemaError};
use crate::services::tours::GeoError;
use crate::services::AccountError;

pub const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
pub const NO_PERMISSION: &str = "You do not have permission to perform this action";
pub const NOT_FOUND: &str = "No data found with that ID";
const GENERIC_ERROR: &str = "Something went very wrong!";

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<FieldErrors>,
    },
    InvalidQueryParameter(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidQueryParameter(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidQueryParameter(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
        }
    }

    /// 4xx responses are the client's fault (`fail`), 5xx ours (`error`).
    pub fn status_label(&self) -> &'static str {
        if self.status_code() >= 500 {
            "error"
        } else {
            "fail"
        }
    }

    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "status": self.status_label(),
            "message": self.message(),
            "code": self.error_code()
        });

        if let ApiError::ValidationError { field_errors: Some(field_errors), .. } = self {
            response["field_errors"] = json!(field_errors);
        }

        response
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidQueryParameter(_) => "INVALID_QUERY_PARAMETER",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<FieldErrors>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn invalid_query_parameter(message: impl Into<String>) -> Self {
        ApiError::InvalidQueryParameter(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_logged_in() -> Self {
        ApiError::Unauthorized(NOT_LOGGED_IN.to_string())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    /// Logs the real cause and hides it from the client.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!("{}: {}", context, err);
        ApiError::internal_server_error(GENERIC_ERROR)
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::invalid_query_parameter(err.to_string())
    }
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Invalid(field_errors) => {
                let message = SchemaError::Invalid(field_errors.clone()).to_string();
                ApiError::validation_error(message, Some(field_errors))
            }
            SchemaError::Rejected(message) => ApiError::bad_request(message),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(_) => ApiError::not_found(NOT_FOUND),
            DatabaseError::UniqueViolation { fields, .. } => ApiError::validation_error(
                format!("Duplicate field value for ({}). Please use another value!", fields),
                None,
            ),
            DatabaseError::Conflict { .. } => {
                ApiError::conflict("The document was changed by another request. Please try again!")
            }
            DatabaseError::Filter(e) => e.into(),
            DatabaseError::Sqlx(e) => ApiError::internal("SQLx error", e),
            other => ApiError::internal("Database error", other),
        }
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound => ApiError::not_found(NOT_FOUND),
            ResourceError::InvalidId(id) => ApiError::bad_request(format!("Invalid id: {}", id)),
            ResourceError::Invalid(e) => e.into(),
            ResourceError::Query(e) => e.into(),
            ResourceError::Database(e) => e.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken(reason) => {
                tracing::debug!("Rejected token: {}", reason);
                ApiError::not_logged_in()
            }
            other => ApiError::internal("Credential service error", other),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::MissingCredentials | AccountError::InvalidResetToken => ApiError::bad_request(err.to_string()),
            AccountError::IncorrectCredentials | AccountError::IncorrectPassword => {
                ApiError::unauthorized(err.to_string())
            }
            AccountError::UnknownEmail => ApiError::not_found(err.to_string()),
            AccountError::DeliveryFailed => ApiError::internal_server_error(err.to_string()),
            AccountError::Resource(e) => e.into(),
            AccountError::Schema(e) => e.into(),
            AccountError::Auth(e) => e.into(),
            AccountError::Database(e) => e.into(),
        }
    }
}

impl From<GeoError> for ApiError {
    fn from(err: GeoError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal("Configuration error", err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
