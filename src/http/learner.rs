//! Learner-facing routes: study content, tests, mock exams, games, chat and search

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::AppState;
use super::extract::AuthUser;
use crate::error::Result;
use crate::games::{check_matching, deal};
use crate::storage::{GameKind, Question};

#[derive(Deserialize)]
struct TopicFilter {
    category: Option<String>,
}

#[derive(Deserialize)]
struct TestFilter {
    topic_id: Option<String>,
}

#[derive(Deserialize)]
struct AnswersBody {
    #[serde(default)]
    answers: HashMap<String, usize>,
}

#[derive(Deserialize, Default)]
struct MockRequest {
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct SeedQuery {
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct MatchGuesses {
    #[serde(default)]
    guesses: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    top_k: Option<usize>,
    min_score: Option<f32>,
}

/// Game listing without the payload (it holds the answers)
#[derive(Serialize)]
struct GameSummary {
    id: String,
    topic_id: Option<String>,
    kind: GameKind,
    title: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/topics", get(list_topics))
        .route("/topics/:id", get(get_topic))
        .route("/tests", get(list_tests))
        .route("/tests/:id", get(get_test))
        .route("/tests/:id/submit", post(submit_test))
        .route("/exams/mock", post(start_mock))
        .route("/exams/:id/submit", post(submit_mock))
        .route("/progress", get(progress))
        .route("/games", get(list_games))
        .route("/games/:id", get(play_game))
        .route("/games/:id/check", post(check_game))
        .route("/chat", post(chat))
        .route("/chat/:session_id", get(chat_history))
        .route("/search", get(search))
}

async fn list_topics(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(filter): Query<TopicFilter>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.list_topics(filter.category.as_deref())?))
}

async fn get_topic(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let topic = state.db.get_topic(&id)?;
    let tests = state.db.list_tests(Some(&topic.id))?;
    Ok(Json(json!({ "topic": topic, "tests": tests })))
}

async fn list_tests(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(filter): Query<TestFilter>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.db.list_tests(filter.topic_id.as_deref())?))
}

async fn get_test(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let test = state.db.get_test(&id)?;
    let questions: Vec<_> = state
        .db
        .questions_for_test(&test.id)?
        .iter()
        .map(Question::public)
        .collect();
    Ok(Json(json!({ "test": test, "questions": questions })))
}

async fn submit_test(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AnswersBody>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.exams.submit_practice(&user, &id, &body.answers)?))
}

async fn start_mock(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Option<Json<MockRequest>>,
) -> Result<impl IntoResponse> {
    let seed = body
        .and_then(|Json(req)| req.seed)
        .unwrap_or_else(rand::random::<u64>);
    Ok(Json(state.exams.start_mock_exam(&user, seed)?))
}

async fn submit_mock(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AnswersBody>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state
            .exams
            .submit_mock(&user, &id, &body.answers, Utc::now())?,
    ))
}

async fn progress(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    Ok(Json(state.exams.progress(&user)?))
}

async fn list_games(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(filter): Query<TestFilter>,
) -> Result<impl IntoResponse> {
    let games: Vec<GameSummary> = state
        .db
        .list_games(filter.topic_id.as_deref())?
        .into_iter()
        .map(|g| GameSummary {
            id: g.id,
            topic_id: g.topic_id,
            kind: g.kind,
            title: g.title,
        })
        .collect();
    Ok(Json(games))
}

async fn play_game(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<SeedQuery>,
) -> Result<impl IntoResponse> {
    let game = state.db.get_game(&id)?;
    let seed = query.seed.unwrap_or_else(rand::random::<u64>);
    Ok(Json(deal(&game, seed)?))
}

async fn check_game(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<MatchGuesses>,
) -> Result<impl IntoResponse> {
    let game = state.db.get_game(&id)?;
    Ok(Json(check_matching(&game, &body.guesses)?))
}

async fn chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let reply = state
        .chatbot
        .ask(&user, req.session_id.as_deref(), &req.message)
        .await?;
    Ok(Json(reply))
}

async fn chat_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.chatbot.history(&user, &session_id)?))
}

async fn search(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse> {
    let hits = state
        .searcher
        .search(
            &query.q,
            query.top_k.unwrap_or(state.config.runtime.search_top_k),
            query
                .min_score
                .unwrap_or(state.config.runtime.search_min_score),
        )
        .await?;
    Ok(Json(hits))
}
