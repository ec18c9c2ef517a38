//! Admin back-office: content editing, document uploads, users and games

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::AppState;
use super::extract::AdminUser;
use crate::error::{LitukError, Result};
use crate::games::populate_games;
use crate::ingest::{content_hash, pdf};
use crate::storage::{NewQuestion, NewTest, NewTopic, Role};

#[derive(Deserialize)]
struct UploadQuery {
    name: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: String,
}

pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/topics", post(create_topic))
        .route("/topics/:id", put(update_topic).delete(delete_topic))
        .route("/tests", post(create_test))
        .route(
            "/tests/:id",
            get(get_test).put(update_test).delete(delete_test),
        )
        .route("/questions", post(create_question))
        .route("/questions/:id", put(update_question).delete(delete_question))
        .route(
            "/documents",
            get(list_documents)
                .post(upload_document)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/documents/:id", get(get_document))
        .route("/documents/:id/reprocess", post(reprocess_document))
        .route("/users", get(list_users))
        .route("/users/:id/role", put(set_role))
        .route("/games/populate", post(populate))
}

async fn create_topic(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(topic): Json<NewTopic>,
) -> Result<impl IntoResponse> {
    Ok((StatusCode::CREATED, Json(state.db.create_topic(&topic, None)?)))
}

async fn update_topic(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(topic): Json<NewTopic>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.update_topic(&id, &topic)?))
}

async fn delete_topic(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.db.delete_topic(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_test(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(test): Json<NewTest>,
) -> Result<impl IntoResponse> {
    Ok((StatusCode::CREATED, Json(state.db.create_test(&test, None)?)))
}

/// Test with its full questions, answer key included
async fn get_test(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let test = state.db.get_test(&id)?;
    let questions = state.db.questions_for_test(&test.id)?;
    Ok(Json(json!({ "test": test, "questions": questions })))
}

async fn update_test(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(test): Json<NewTest>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.update_test(&id, &test)?))
}

async fn delete_test(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.db.delete_test(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_question(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(question): Json<NewQuestion>,
) -> Result<impl IntoResponse> {
    Ok((
        StatusCode::CREATED,
        Json(state.db.create_question(&question)?),
    ))
}

async fn update_question(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(question): Json<NewQuestion>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.update_question(&id, &question)?))
}

async fn delete_question(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.db.delete_question(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accept a raw PDF body; processing continues in the background
async fn upload_document(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    if body.is_empty() {
        return Err(LitukError::validation("request body is empty"));
    }
    if !pdf::looks_like_pdf(&body) {
        return Err(LitukError::validation(
            "upload is not a PDF (missing %PDF header)",
        ));
    }
    let name = query
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload.pdf".to_string());
    let hash = content_hash(&body);
    let prepared = state.pipeline.prepare(&name, &hash, query.force)?;
    if prepared.skip {
        return Ok((
            StatusCode::OK,
            Json(json!({ "document": prepared.document, "skipped": true })),
        ));
    }

    info!(
        "{} uploaded {} ({} bytes) as document {}",
        admin.email,
        name,
        body.len(),
        prepared.document.id
    );
    let pipeline = state.pipeline.clone();
    let document = prepared.document.clone();
    let bytes = body.to_vec();
    tokio::spawn(async move {
        if let Err(e) = pipeline.process_pdf(&document, bytes).await {
            error!("Ingestion of {} failed: {}", document.id, e);
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "document": prepared.document, "skipped": false })),
    ))
}

async fn list_documents(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.list_documents()?))
}

async fn get_document(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let document = state.db.get_document(&id)?;
    let chunks = state.db.chunks_for_document(&document.id)?;
    let embedded = chunks.iter().filter(|c| c.embedding.is_some()).count();
    Ok(Json(json!({
        "document": document,
        "chunks": chunks.len(),
        "embedded_chunks": embedded,
    })))
}

async fn reprocess_document(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let document = state.pipeline.begin_reprocess(&id)?;
    let pipeline = state.pipeline.clone();
    let claimed = document.clone();
    let document_id = document.id.clone();
    tokio::spawn(async move {
        match pipeline.run_reprocess(&claimed).await {
            Ok(report) => info!(
                "Reprocessed {}: {} embedded, status {}",
                document_id,
                report.embedded,
                report.status.as_str()
            ),
            Err(e) => error!("Reprocessing {} failed: {}", document_id, e),
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "document": document }))))
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.list_users()?))
}

async fn set_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<impl IntoResponse> {
    let role = Role::parse(req.role.trim())
        .ok_or_else(|| LitukError::validation(format!("unknown role '{}'", req.role)))?;
    if admin.id == id && role != Role::Admin {
        return Err(LitukError::Conflict {
            message: "admins cannot demote themselves".to_string(),
        });
    }
    Ok(Json(state.auth.set_role(&id, role)?))
}

async fn populate(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    let report = tokio::task::spawn_blocking(move || populate_games(&db))
        .await
        .map_err(|e| LitukError::Internal {
            message: format!("game population task failed: {e}"),
        })??;
    Ok(Json(report))
}
