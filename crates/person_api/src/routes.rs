//! Route table and request handlers.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, warn};
use person_core::{core_version, Deadline, NewPerson, PersonProfile};
use serde_json::{json, Value};
use tokio::task;

/// Builds the service router over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/person/:person_id/info", get(get_person_info))
        .route("/person/create", post(create_person))
        .route("/health", get(health))
        .with_state(state)
}

async fn get_person_info(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<PersonProfile>, ApiError> {
    let person_id = raw_id.trim().parse::<i64>().map_err(|_| {
        debug!("event=http_request module=api status=rejected reason=invalid_person_id");
        ApiError::InvalidPersonId
    })?;

    let service = state.service.clone();
    let lookup = task::spawn_blocking(move || service.get_profile_raw(person_id));

    // The blocking read keeps running after a timeout; it holds no write lock.
    let joined = tokio::time::timeout(state.config.request_timeout, lookup)
        .await
        .map_err(|_| ApiError::ReadTimeout)?;
    let profile = joined
        .map_err(|err| ApiError::TaskFailed(err.to_string()))?
        .map_err(ApiError::Read)?;

    Ok(Json(profile))
}

async fn create_person(
    State(state): State<AppState>,
    payload: Result<Json<NewPerson>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(person) = payload.map_err(|rejection| {
        warn!(
            "event=http_request module=api status=rejected reason=invalid_body detail={}",
            rejection.body_text().replace(['\n', '\r'], " ")
        );
        ApiError::InvalidBody
    })?;

    let deadline = Deadline::after(state.config.request_timeout);
    let service = state.service.clone();
    let person_id = task::spawn_blocking(move || service.create_person(&person, deadline))
        .await
        .map_err(|err| ApiError::TaskFailed(err.to_string()))?
        .map_err(ApiError::Create)?;

    Ok((
        StatusCode::OK,
        [(header::LOCATION, format!("/person/{person_id}/info"))],
    ))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": core_version() }))
}
