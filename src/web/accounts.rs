//! Login and logout.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use super::auth::{
    LOGIN_PATH, expired_session_cookie, found, safe_next, session_cookie, session_token,
};
use super::templates::LOGIN;
use crate::error::{AuthError, WebError};
use crate::store::SessionMessage;
use crate::users::password::authenticate;

const BAD_LOGIN: &str = "Please enter a correct username and password.";

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/login/", get(login_form).post(login))
        .route("/accounts/logout/", post(logout))
}

#[derive(Debug, Deserialize)]
struct NextQuery {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
    #[serde(default)]
    next: Option<String>,
}

fn render_login(
    state: &AppState,
    next: &str,
    username: &str,
    error: Option<&str>,
) -> Result<Html<String>, WebError> {
    let mut ctx = tera::Context::new();
    ctx.insert("messages", &Vec::<SessionMessage>::new());
    ctx.insert("next", next);
    ctx.insert("username", username);
    ctx.insert("error", &error);
    Ok(Html(state.templates.render(LOGIN, &ctx)?))
}

async fn login_form(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
) -> Result<Html<String>, WebError> {
    render_login(&state, safe_next(query.next.as_deref()), "", None)
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Result<Response, WebError> {
    let next = safe_next(form.next.as_deref()).to_string();

    let user = match authenticate(state.db.as_ref(), &form.username, &form.password).await {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => {
            tracing::info!(username = %form.username, "Failed login");
            return Ok(render_login(&state, &next, &form.username, Some(BAD_LOGIN))?.into_response());
        }
        Err(e) => return Err(e.into()),
    };

    let ttl = chrono::Duration::from_std(state.session_ttl).unwrap_or(chrono::Duration::days(14));
    let token = state.db.create_session(user.id, Utc::now() + ttl).await?;
    tracing::info!(user_id = user.id, username = %user.username, "Logged in");

    let mut response = found(next);
    let cookie = session_cookie(token, state.session_ttl.as_secs());
    if let Ok(value) = cookie.parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, WebError> {
    if let Some(token) = session_token(&headers) {
        state.db.delete_session(token).await?;
    }
    let mut response = found(LOGIN_PATH);
    if let Ok(value) = expired_session_cookie().parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}
