use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use lituk::config::Config;
use lituk::embeddings::FakeEmbedder;
use lituk::http::{AppState, build_router};
use lituk::llm::ScriptedChat;
use lituk::storage::Database;

fn app_with_chat(chat: Arc<ScriptedChat>) -> Router {
    let db = Database::open_in_memory().unwrap();
    let state = AppState::new(
        Config::default(),
        db,
        Arc::new(FakeEmbedder::new(None)),
        chat,
    );
    build_router(state)
}

fn app() -> Router {
    app_with_chat(Arc::new(ScriptedChat::new()))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Register then log in, returning the access token
async fn sign_up(app: &Router, email: &str) -> String {
    let (status, _) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["tokens"]["access_token"].as_str().unwrap().to_string()
}

/// Admin creates a topic and a three-question practice test; returns the test id
async fn seed_content(app: &Router, admin: &str) -> (String, Vec<String>) {
    let (status, topic) = send(
        app,
        "POST",
        "/api/admin/topics",
        Some(admin),
        Some(json!({
            "title": "Traditions and customs",
            "description": "Patron saints and national days",
            "category": "culture"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let topic_id = topic["id"].as_str().unwrap().to_string();

    let (status, test) = send(
        app,
        "POST",
        "/api/admin/tests",
        Some(admin),
        Some(json!({ "title": "Customs practice", "topic_id": topic_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let test_id = test["id"].as_str().unwrap().to_string();

    let questions = [
        ("When is St David's Day?", ["1 March", "17 March", "23 April"], 0),
        ("When is St Patrick's Day?", ["1 March", "17 March", "30 November"], 1),
        ("When is St Andrew's Day?", ["1 March", "23 April", "30 November"], 2),
    ];
    let mut ids = Vec::new();
    for (text, options, correct) in questions {
        let (status, q) = send(
            app,
            "POST",
            "/api/admin/questions",
            Some(admin),
            Some(json!({
                "test_id": test_id,
                "topic_id": topic_id,
                "text": text,
                "options": options,
                "correct_index": correct,
                "explanation": "National days"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(q["id"].as_str().unwrap().to_string());
    }
    (test_id, ids)
}

#[tokio::test]
async fn test_health_and_info_are_public() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));

    let (status, body) = send(&app, "GET", "/info", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chat"]["model"], "scripted");
    assert_eq!(body["embedding"]["dim"], 256);
    assert_eq!(body["db"]["counts"]["users"], 0);
}

#[tokio::test]
async fn test_first_user_is_admin_and_roles_are_enforced() {
    let app = app();
    let admin = sign_up(&app, "admin@example.com").await;
    let learner = sign_up(&app, "learner@example.com").await;

    let (_, me) = send(&app, "GET", "/api/auth/me", Some(&admin), None).await;
    assert_eq!(me["role"], "admin");
    let (_, me) = send(&app, "GET", "/api/auth/me", Some(&learner), None).await;
    assert_eq!(me["role"], "user");
    assert_eq!(me["display_name"], "learner");

    let (status, body) = send(&app, "GET", "/api/topics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], 401);

    let (status, _) = send(
        &app,
        "POST",
        "/api/admin/topics",
        Some(&learner),
        Some(json!({ "title": "Sneaky" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, users) = send(&app, "GET", "/api/admin/users", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_bad_login() {
    let app = app();
    sign_up(&app, "a@example.com").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": "A@example.com", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "a@example.com", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]["message"].as_str().unwrap().contains("invalid email or password"));
}

#[tokio::test]
async fn test_refresh_rotates_and_logout_revokes() {
    let app = app();
    sign_up(&app, "a@example.com").await;
    let (_, login) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "a@example.com", "password": "correct horse" })),
    )
    .await;
    let refresh = login["tokens"]["refresh_token"].as_str().unwrap().to_string();

    let (status, pair) = send(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = pair["access_token"].as_str().unwrap().to_string();

    // the old refresh token was rotated away
    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/api/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "POST", "/api/auth/logout", Some(&access), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", "/api/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_practice_test_hides_answers_and_grades() {
    let app = app();
    let admin = sign_up(&app, "admin@example.com").await;
    let learner = sign_up(&app, "learner@example.com").await;
    let (test_id, qids) = seed_content(&app, &admin).await;

    let (status, body) = send(&app, "GET", &format!("/api/tests/{test_id}"), Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 3);
    assert!(questions.iter().all(|q| q.get("correct_index").is_none()));
    assert!(questions.iter().all(|q| q.get("explanation").is_none()));

    let (status, full) = send(&app, "GET", &format!("/api/admin/tests/{test_id}"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(full["questions"][1]["correct_index"], 1);

    let (status, result) = send(
        &app,
        "POST",
        &format!("/api/tests/{test_id}/submit"),
        Some(&learner),
        Some(json!({ "answers": { (qids[0].clone()): 0, (qids[1].clone()): 2 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["score"], 1);
    assert_eq!(result["total"], 3);
    assert_eq!(result["percent"], 33);
    assert_eq!(result["passed"], false);
    assert_eq!(result["results"][1]["correct_index"], 1);

    let (_, progress) = send(&app, "GET", "/api/progress", Some(&learner), None).await;
    assert_eq!(progress["attempts"], 1);
    assert_eq!(progress["mock_attempts"], 0);
    assert_eq!(progress["ready"], false);
}

#[tokio::test]
async fn test_admin_validation_and_not_found() {
    let app = app();
    let admin = sign_up(&app, "admin@example.com").await;
    let (test_id, qids) = seed_content(&app, &admin).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/admin/questions",
        Some(&admin),
        Some(json!({
            "test_id": test_id,
            "text": "Only one option?",
            "options": ["yes"],
            "correct_index": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);

    let (status, _) = send(&app, "GET", "/api/tests/nope", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", &format!("/api/admin/questions/{}", qids[0]), Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, tests) = send(&app, "GET", "/api/tests", Some(&admin), None).await;
    assert_eq!(tests[0]["question_count"], 2);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/admin/users/whoever/role",
        Some(&admin),
        Some(json!({ "role": "superuser" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mock_exam_flow() {
    let app = app();
    let admin = sign_up(&app, "admin@example.com").await;
    let learner = sign_up(&app, "learner@example.com").await;
    seed_content(&app, &admin).await;

    let (status, exam) = send(&app, "POST", "/api/exams/mock", Some(&learner), Some(json!({ "seed": 7 }))).await;
    assert_eq!(status, StatusCode::OK);
    let attempt_id = exam["attempt_id"].as_str().unwrap().to_string();
    // fewer questions in the bank than a full exam: all of them are drawn
    assert_eq!(exam["questions"].as_array().unwrap().len(), 3);

    let (_, again) = send(&app, "POST", "/api/exams/mock", Some(&learner), Some(json!({ "seed": 7 }))).await;
    assert_eq!(again["questions"], exam["questions"]);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/exams/{attempt_id}/submit"),
        Some(&admin),
        Some(json!({ "answers": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, result) = send(
        &app,
        "POST",
        &format!("/api/exams/{attempt_id}/submit"),
        Some(&learner),
        Some(json!({ "answers": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["kind"], "mock");
    assert_eq!(result["score"], 0);
    assert_eq!(result["timed_out"], false);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/exams/{attempt_id}/submit"),
        Some(&learner),
        Some(json!({ "answers": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, progress) = send(&app, "GET", "/api/progress", Some(&learner), None).await;
    assert_eq!(progress["mock_attempts"], 1);
}

#[tokio::test]
async fn test_games_populate_deal_and_check() {
    let app = app();
    let admin = sign_up(&app, "admin@example.com").await;
    let learner = sign_up(&app, "learner@example.com").await;
    seed_content(&app, &admin).await;

    let (status, _) = send(&app, "POST", "/api/admin/games/populate", Some(&learner), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, report) = send(&app, "POST", "/api/admin/games/populate", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["games"], 2);

    let (_, games) = send(&app, "GET", "/api/games", Some(&learner), None).await;
    let games = games.as_array().unwrap();
    assert_eq!(games.len(), 2);
    assert!(games.iter().all(|g| g.get("payload").is_none()));

    let matching = games.iter().find(|g| g["kind"] == "matching").unwrap();
    let id = matching["id"].as_str().unwrap();
    let (status, dealt) = send(&app, "GET", &format!("/api/games/{id}?seed=3"), Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dealt["kind"], "matching");
    assert_eq!(dealt["left"].as_array().unwrap().len(), 3);
    let (_, same) = send(&app, "GET", &format!("/api/games/{id}?seed=3"), Some(&learner), None).await;
    assert_eq!(same, dealt);

    let (status, result) = send(
        &app,
        "POST",
        &format!("/api/games/{id}/check"),
        Some(&learner),
        Some(json!({ "guesses": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["correct"], 0);
    assert_eq!(result["total"], 3);
    assert_eq!(result["completed"], false);

    let flashcards = games.iter().find(|g| g["kind"] == "flashcards").unwrap();
    let id = flashcards["id"].as_str().unwrap();
    let (_, dealt) = send(&app, "GET", &format!("/api/games/{id}"), Some(&learner), None).await;
    assert_eq!(dealt["cards"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_chat_and_history() {
    let chat = Arc::new(ScriptedChat::with_responses(["St David's Day is on 1 March."]));
    let app = app_with_chat(chat);
    let learner = sign_up(&app, "learner@example.com").await;

    let (status, _) = send(&app, "POST", "/api/chat", Some(&learner), Some(json!({ "message": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, reply) = send(
        &app,
        "POST",
        "/api/chat",
        Some(&learner),
        Some(json!({ "message": "When is St David's Day?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["answer"], "St David's Day is on 1 March.");
    assert_eq!(reply["fallback"], false);
    let session = reply["session_id"].as_str().unwrap();

    let (status, history) = send(&app, "GET", &format!("/api/chat/{session}"), Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "user");

    // queue is now empty: the next answer comes from the fallback
    let (_, reply) = send(
        &app,
        "POST",
        "/api/chat",
        Some(&learner),
        Some(json!({ "message": "And St George's Day?", "session_id": session })),
    )
    .await;
    assert_eq!(reply["fallback"], true);
}

#[tokio::test]
async fn test_search_requires_query_and_documents_reject_non_pdf() {
    let app = app();
    let admin = sign_up(&app, "admin@example.com").await;

    let (status, hits) = send(&app, "GET", "/api/search?q=magna%20carta", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits, json!([]));

    let req = Request::builder()
        .method("POST")
        .uri("/api/admin/documents?name=notes.txt")
        .header(header::AUTHORIZATION, format!("Bearer {admin}"))
        .body(Body::from("just some text"))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let (_, docs) = send(&app, "GET", "/api/admin/documents", Some(&admin), None).await;
    assert_eq!(docs, json!([]));
}

#[tokio::test]
async fn test_metrics_count_routes() {
    let app = app();
    send(&app, "GET", "/health", None, None).await;
    send(&app, "GET", "/health", None, None).await;
    send(&app, "GET", "/api/topics", None, None).await;

    let (status, metrics) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total_requests"], 3);
    assert_eq!(metrics["errors_total"], 1);
    assert_eq!(metrics["routes_top_5"][0]["route"], "GET /health");
    assert_eq!(metrics["routes_top_5"][0]["count"], 2);
}
