use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::errors::{FaceIdError, FaceIdResult};
use crate::AppState;

/// Text and file parts of one multipart body, keyed by field name.
#[derive(Default)]
struct FormParts {
    text: HashMap<String, String>,
    files: HashMap<String, Bytes>,
}

impl FormParts {
    fn text(&self, name: &'static str) -> FaceIdResult<&str> {
        self.text.get(name).map(String::as_str).ok_or(FaceIdError::MissingField(name))
    }

    /// Parts sent without a filename land in `text` when they happen to be
    /// valid UTF-8, so look there too.
    fn take_file(&mut self, name: &'static str) -> FaceIdResult<Bytes> {
        self.files
            .remove(name)
            .or_else(|| self.text.remove(name).map(Bytes::from))
            .ok_or(FaceIdError::MissingField(name))
    }
}

async fn read_form(mut multipart: Multipart) -> FaceIdResult<FormParts> {
    let mut parts = FormParts::default();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| FaceIdError::MalformedRequest(e.to_string()))?;
        let Some(field) = field else { break };
        let Some(name) = field.name().map(str::to_string) else { continue };
        // A part with a filename is an upload even when it is empty.
        if field.file_name().is_some() {
            let data = field.bytes().await.map_err(|e| FaceIdError::MalformedRequest(e.to_string()))?;
            parts.files.insert(name, data);
        } else {
            let data = field.bytes().await.map_err(|e| FaceIdError::MalformedRequest(e.to_string()))?;
            match String::from_utf8(data.to_vec()) {
                Ok(text) => {
                    parts.text.insert(name, text);
                }
                Err(_) => {
                    parts.files.insert(name, data);
                }
            }
        }
    }
    Ok(parts)
}

fn log_service_fault(route: &str, e: &FaceIdError) {
    if e.status_code().is_server_error() {
        error!("{} failed: {}", route, e);
    } else {
        warn!("{} rejected: {}", route, e);
    }
}

pub async fn register(State(state): State<Arc<AppState>>, multipart: Multipart) -> impl IntoResponse {
    let result = async {
        let mut form = read_form(multipart).await?;
        let username = form.text("username")?.to_string();
        let image1 = form.take_file("image1")?;
        let image2 = form.take_file("image2")?;
        state.engine.register(&username, image1, image2).await
    }
    .await;

    match result {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::json!({ "message": outcome.message }))),
        Err(e) => {
            log_service_fault("register", &e);
            (e.status_code(), Json(serde_json::json!({ "error": e.public_message() })))
        }
    }
}

pub async fn verify(State(state): State<Arc<AppState>>, multipart: Multipart) -> impl IntoResponse {
    let result = async {
        let mut form = read_form(multipart).await?;
        let username = form.text("username")?.to_string();
        let live_image = form.take_file("live_image")?;
        state.engine.verify(&username, live_image).await
    }
    .await;

    match result {
        Ok(verdict) => (StatusCode::OK, Json(serde_json::json!(verdict))),
        Err(e) => {
            log_service_fault("verify", &e);
            (
                e.status_code(),
                Json(serde_json::json!({ "verified": false, "error": e.public_message() })),
            )
        }
    }
}

pub async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Server is running" }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let extractor = state.engine.extractor();
    let ready = extractor.is_ready();
    let body = serde_json::json!({
        "status": if ready { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": "SQLite",
        "extractor": extractor.name(),
        "model_ready": ready,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    });
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.stats().snapshot();
    match state.engine.store().count().await {
        Ok(identities) => {
            let mut body = serde_json::json!(snapshot);
            body["identities"] = serde_json::json!(identities);
            body["match_threshold"] = serde_json::json!(state.engine.threshold());
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            log_service_fault("stats", &e);
            (e.status_code(), Json(serde_json::json!({ "error": e.public_message() })))
        }
    }
}

pub async fn get_user(State(state): State<Arc<AppState>>, Path(username): Path<String>) -> impl IntoResponse {
    let username = match crate::pipeline::engine::normalize_username(&username) {
        Ok(u) => u,
        Err(e) => return (e.status_code(), Json(serde_json::json!({ "error": e.public_message() }))),
    };
    match state.engine.store().get(&username).await {
        Ok(Some(record)) => (StatusCode::OK, Json(serde_json::json!(record.summary()))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": crate::models::identity::USER_NOT_FOUND })),
        ),
        Err(e) => {
            log_service_fault("get_user", &e);
            (e.status_code(), Json(serde_json::json!({ "error": e.public_message() })))
        }
    }
}

pub async fn delete_user(State(state): State<Arc<AppState>>, Path(username): Path<String>) -> impl IntoResponse {
    let username = match crate::pipeline::engine::normalize_username(&username) {
        Ok(u) => u,
        Err(e) => return (e.status_code(), Json(serde_json::json!({ "error": e.public_message() }))),
    };
    match state.engine.store().delete(&username).await {
        Ok(deleted) => {
            if deleted {
                info!("Deleted identity {}", username);
            }
            (StatusCode::OK, Json(serde_json::json!({ "deleted": deleted })))
        }
        Err(e) => {
            log_service_fault("delete_user", &e);
            (e.status_code(), Json(serde_json::json!({ "error": e.public_message() })))
        }
    }
}
