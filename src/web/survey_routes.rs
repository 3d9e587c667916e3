use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use super::AppState;
use super::auth::CurrentUser;
use super::params::IdPath;
use crate::error::WebError;
use crate::survey::{TopClassesOptions, TopClassesReport, top_classes};

pub fn survey_routes() -> Router<AppState> {
    Router::new().route("/survey/{id}/top_classes", get(top_classes_report))
}

async fn top_classes_report(
    _current: CurrentUser,
    State(state): State<AppState>,
    IdPath(id): IdPath,
    Query(options): Query<TopClassesOptions>,
) -> Result<Json<TopClassesReport>, WebError> {
    Ok(Json(top_classes(state.db.as_ref(), id, &options).await?))
}
