//! Error types for the ESP site.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        DatabaseError::Query(e.to_string())
    }
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),
}

/// Login/session errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::NotFound(what) => {
                tracing::debug!(what = %what, "Resource not found");
                (
                    StatusCode::NOT_FOUND,
                    Html(format!("<h1>Not Found</h1><p>{what} not found.</p>")),
                )
                    .into_response()
            }
            WebError::Database(DatabaseError::NotFound { entity, id }) => {
                WebError::NotFound(format!("{entity} {id}")).into_response()
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Html("<h1>Server Error</h1>".to_string()),
                )
                    .into_response()
            }
        }
    }
}
