//! dbmail pages: preview, test send, and list routing lookups.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};

use super::AppState;
use super::auth::{CurrentUser, found};
use super::params::IdPath;
use super::templates::PREVIEW_EMAIL;
use crate::dbmail::{EmailListRouter, TestSendOutcome};
use crate::error::WebError;
use crate::store::MessageLevel;

pub fn dbmail_routes() -> Router<AppState> {
    Router::new()
        .route("/dbmail/preview/{id}/", get(preview_email))
        .route("/dbmail/send_test/{id}/", any(send_test_email))
        .route("/dbmail/route/{address}", get(route_address))
}

fn preview_url(id: i64) -> String {
    format!("/dbmail/preview/{id}/")
}

// ── Preview ─────────────────────────────────────────────────────────────

async fn preview_email(
    current: CurrentUser,
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Html<String>, WebError> {
    let preview = state.preview.preview(id, &current.user).await?;
    let messages = state.db.take_session_messages(current.session).await?;

    let mut ctx = tera::Context::new();
    ctx.insert("request_id", &id);
    ctx.insert("subject", &preview.rendered.subject);
    ctx.insert("msgtext", &preview.rendered.msgtext);
    ctx.insert("send_from", &preview.send_from);
    ctx.insert("sample_user", &preview.sample_user);
    ctx.insert("recipient_count", &preview.recipient_count);
    ctx.insert("viewer_email", &current.user.email);
    ctx.insert("messages", &messages);

    Ok(Html(state.templates.render(PREVIEW_EMAIL, &ctx)?))
}

// ── Test send ───────────────────────────────────────────────────────────

async fn send_test_email(
    current: CurrentUser,
    State(state): State<AppState>,
    method: Method,
    IdPath(id): IdPath,
) -> Result<Response, WebError> {
    if method != Method::POST {
        state
            .db
            .push_session_message(current.session, MessageLevel::Error, "Invalid request method.")
            .await?;
        return Ok(found(preview_url(id)));
    }

    let outcome = state.preview.send_test(id, &current.user).await?;
    let level = match &outcome {
        TestSendOutcome::Sent { .. } => MessageLevel::Success,
        TestSendOutcome::Failed { .. } => MessageLevel::Error,
    };
    state
        .db
        .push_session_message(current.session, level, &outcome.notice())
        .await?;

    Ok(found(preview_url(id)))
}

// ── Routing lookup ──────────────────────────────────────────────────────

async fn route_address(
    _current: CurrentUser,
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, WebError> {
    let router = EmailListRouter::load(state.db.as_ref()).await?;
    match router.resolve(state.db.as_ref(), &address).await? {
        Some(resolved) => Ok(Json(resolved).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "address": address,
                "error": "no list handles this address",
            })),
        )
            .into_response()),
    }
}
