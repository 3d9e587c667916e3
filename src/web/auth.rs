//! Session cookies and the logged-in user extractor.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::AppState;
use crate::error::WebError;
use crate::users::User;

pub const SESSION_COOKIE: &str = "sessionid";
pub const LOGIN_PATH: &str = "/accounts/login/";

/// 302 to `location`.
pub fn found(location: impl Into<String>) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.into())]).into_response()
}

/// Login page URL that returns to `next` afterwards.
pub fn login_url(next: &str) -> String {
    format!("{LOGIN_PATH}?next={}", urlencoding::encode(next))
}

/// Only same-site absolute paths are followed after login.
///
/// Browsers read `\` as `/` and drop tabs and newlines, so any of those could
/// turn a path into a `//host` reference.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.chars().any(|c| c == '\\' || c.is_control()) =>
        {
            path
        }
        _ => "/",
    }
}

/// The session token from the request's `Cookie` header, if any.
pub fn session_token(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn session_cookie(token: Uuid, max_age_secs: u64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// A request made by a logged-in user.
///
/// Anonymous requests are redirected to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Uuid,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let next = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        let Some(session) = session_token(&parts.headers) else {
            return Err(found(login_url(&next)));
        };

        match state.db.get_session_user(session).await {
            Ok(Some(user)) => Ok(CurrentUser { user, session }),
            Ok(None) => {
                tracing::debug!(path = %next, "Session unknown or expired");
                Err(found(login_url(&next)))
            }
            Err(e) => Err(WebError::from(e).into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_session_cookie_among_others() {
        let token = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("csrftoken=abc; sessionid={token}; theme=dark")).unwrap(),
        );
        assert_eq!(session_token(&headers), Some(token));
    }

    #[test]
    fn ignores_malformed_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sessionid=not-a-uuid"));
        assert_eq!(session_token(&headers), None);
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn login_url_encodes_next() {
        assert_eq!(
            login_url("/dbmail/preview/5/"),
            "/accounts/login/?next=%2Fdbmail%2Fpreview%2F5%2F"
        );
    }

    #[test]
    fn next_must_stay_on_site() {
        assert_eq!(safe_next(Some("/dbmail/preview/1/")), "/dbmail/preview/1/");
        assert_eq!(safe_next(Some("//evil.example.com/")), "/");
        assert_eq!(safe_next(Some("https://evil.example.com/")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn next_rejects_backslash_and_control_tricks() {
        assert_eq!(safe_next(Some("/\\evil.example.com")), "/");
        assert_eq!(safe_next(Some("\\\\evil.example.com")), "/");
        assert_eq!(safe_next(Some("/dbmail\\..\\x")), "/");
        assert_eq!(safe_next(Some("/\t/evil.example.com")), "/");
        assert_eq!(safe_next(Some("/\n/evil.example.com")), "/");
        assert_eq!(safe_next(Some("/survey/1/top_classes?limit=5")), "/survey/1/top_classes?limit=5");
    }
}
