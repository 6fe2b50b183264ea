//! Error taxonomy shared by every component.
//!
//! Each variant maps to exactly one wire code and HTTP status.
//! [`Error::BadParameter`] and [`Error::ServerError`] carry optional
//! structured detail, stripped from responses unless detail exposure is
//! enabled at the HTTP boundary.

use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or semantically invalid input.
    #[error("{message}")]
    BadParameter {
        message: String,
        detail: Option<Value>,
    },

    /// The caller is not signed in.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The caller is signed in but not allowed to perform the action.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown email or wrong password. Both cases share this variant.
    #[error("invalid email or password")]
    InvalidCredential,

    #[error("{0}")]
    NotExist(String),

    #[error("{0}")]
    Preexist(String),

    #[error("{message}")]
    ServerError {
        message: String,
        detail: Option<Value>,
    },

    #[error("route not found")]
    RouteNotFound,
}

impl Error {
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter {
            message: message.into(),
            detail: None,
        }
    }

    pub fn bad_parameter_with_detail(message: impl Into<String>, detail: Value) -> Self {
        Self::BadParameter {
            message: message.into(),
            detail: Some(detail),
        }
    }

    pub fn not_exist(message: impl Into<String>) -> Self {
        Self::NotExist(message.into())
    }

    pub fn preexist(message: impl Into<String>) -> Self {
        Self::Preexist(message.into())
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::ServerError {
            message: message.into(),
            detail: None,
        }
    }

    pub fn server_with_detail(message: impl Into<String>, detail: Value) -> Self {
        Self::ServerError {
            message: message.into(),
            detail: Some(detail),
        }
    }

    /// Stable wire code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParameter { .. } => "bad_parameter",
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::InvalidCredential => "invalid_user",
            Self::NotExist(_) => "notexist",
            Self::Preexist(_) => "preexist",
            Self::ServerError { .. } => "server_error",
            Self::RouteNotFound => "route_not_found",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadParameter { .. } | Self::InvalidCredential => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotExist(_) | Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Preexist(_) => StatusCode::CONFLICT,
            Self::ServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the HTTP boundary logs this error at warn level.
    ///
    /// Routine auth rejections and unknown routes are only logged at info.
    #[must_use]
    pub fn should_log(&self) -> bool {
        !matches!(
            self,
            Self::Unauthenticated | Self::Unauthorized | Self::RouteNotFound
        )
    }

    #[must_use]
    pub fn detail(&self) -> Option<&Value> {
        match self {
            Self::BadParameter { detail, .. } | Self::ServerError { detail, .. } => {
                detail.as_ref()
            }
            _ => None,
        }
    }

    /// JSON envelope sent to clients.
    #[must_use]
    pub fn to_body(&self, expose_detail: bool) -> Value {
        let mut body = json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
        });
        if expose_detail {
            if let Some(detail) = self.detail() {
                body["detail"] = detail.clone();
            }
        }
        body
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::server_with_detail("database error", json!({ "cause": err.to_string() }))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::server_with_detail("upstream request failed", json!({ "cause": err.to_string() }))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::server_with_detail("serialization error", json!({ "cause": err.to_string() }))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::server_with_detail("background task failed", json!({ "cause": err.to_string() }))
    }
}
