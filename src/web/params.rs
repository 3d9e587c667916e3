//! Path parameters.

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use crate::error::WebError;

/// A numeric `{id}` path segment. Anything that is not an integer is a 404, like an unknown id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdPath(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for IdPath {
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<i64>::from_request_parts(parts, state).await {
            Ok(Path(id)) => Ok(IdPath(id)),
            Err(rejection) => {
                tracing::debug!(path = %parts.uri.path(), error = %rejection, "Non-numeric id");
                Err(WebError::NotFound("Page".into()))
            }
        }
    }
}
