use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use taskboard::create_app;

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    std::env::set_var(
        "PERMISSIONS",
        "role_management:1,user_management:2,task_management:3",
    );

    let app = create_app(pool.clone()).await?;
    Ok((app, pool, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    payload: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let req = match payload {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn admin_token(app: &Router, pool: &SqlitePool) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"name": "Admin", "email": "admin@example.com", "password": "secret123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

    let token = body["data"]["token"].as_str().unwrap().to_string();
    let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();

    sqlx::query("UPDATE users SET permissions = '[1,2,3]' WHERE id = ?")
        .bind(&user_id)
        .execute(pool)
        .await?;

    Ok(token)
}

async fn create_user(app: &Router, token: &str, name: &str, email: &str, status_val: &str) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/api/user",
        Some(token),
        Some(json!({"name": name, "email": email, "password": "secret123", "status": status_val})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(body["data"]["id"].as_str().unwrap().to_string())
}

async fn create_task(app: &Router, token: &str, payload: Value) -> Result<String> {
    let (status, body) = send(app, "POST", "/api/tasks", Some(token), Some(payload)).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(body["data"]["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn task_create_applies_defaults() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    let (status, body) = send(
        &app,
        "POST",
        "/api/tasks",
        Some(&token),
        Some(json!({"title": "  Ship the release  "})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["title"], "Ship the release");
    assert_eq!(body["data"]["status"], "TODO");
    assert_eq!(body["data"]["priority"], "MEDIUM");
    assert_eq!(body["data"]["tags"], json!([]));
    assert_eq!(body["data"]["subtasks"], json!([]));
    assert!(body["data"]["assigned_to"].is_null());

    Ok(())
}

#[tokio::test]
async fn task_create_validates_title_and_assignee() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    let (status, _) = send(&app, "POST", "/api/tasks", Some(&token), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/tasks",
        Some(&token),
        Some(json!({"title": "x".repeat(201)})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // the limit counts characters, not bytes
    let (status, body) = send(
        &app,
        "POST",
        "/api/tasks",
        Some(&token),
        Some(json!({"title": "\u{e9}".repeat(200)})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = send(
        &app,
        "POST",
        "/api/tasks",
        Some(&token),
        Some(json!({"title": "\u{e9}".repeat(201)})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // unknown assignee rejects the request and persists nothing
    let (status, body) = send(
        &app,
        "POST",
        "/api/tasks",
        Some(&token),
        Some(json!({"title": "Orphaned", "assignedTo": "00000000-0000-0000-0000-000000000000"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tasks WHERE title = 'Orphaned'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn task_update_handles_assignment_states() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;
    let grace = create_user(&app, &token, "Grace", "grace@example.com", "available").await?;

    let task_id = create_task(&app, &token, json!({"title": "Review docs", "assignedTo": grace})).await?;

    // absent assignedTo leaves the assignment alone
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/tasks/{task_id}"),
        Some(&token),
        Some(json!({"priority": "HIGH"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["priority"], "HIGH");
    assert_eq!(body["data"]["assigned_to"]["name"], "Grace");

    // explicit null unassigns
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/tasks/{task_id}"),
        Some(&token),
        Some(json!({"assignedTo": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["assigned_to"].is_null());

    Ok(())
}

#[tokio::test]
async fn task_list_filters() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;
    let grace = create_user(&app, &token, "Grace", "grace@example.com", "available").await?;

    create_task(&app, &token, json!({"title": "Write report", "priority": "HIGH"})).await?;
    create_task(&app, &token, json!({"title": "Fix login bug", "assignedTo": grace})).await?;
    create_task(&app, &token, json!({"title": "Plan sprint", "status": "DONE"})).await?;

    let (status, body) = send(&app, "GET", "/api/tasks", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (_, body) = send(&app, "GET", "/api/tasks?status=DONE", Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["title"], "Plan sprint");

    let (_, body) = send(&app, "GET", "/api/tasks?priority=HIGH", Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", &format!("/api/tasks?assignedTo={grace}"), Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["assigned_to"]["id"], Value::String(grace.clone()));

    let (_, body) = send(&app, "GET", "/api/tasks?search=login", Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["title"], "Fix login bug");

    Ok(())
}

#[tokio::test]
async fn bulk_update_is_partial_and_order_preserving() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    let first = create_task(&app, &token, json!({"title": "First"})).await?;
    let second = create_task(&app, &token, json!({"title": "Second"})).await?;

    let (status, body) = send(
        &app,
        "POST",
        "/api/tasks/bulk-update",
        Some(&token),
        Some(json!({"updates": [
            {"id": first, "status": "DONE"},
            {"id": "00000000-0000-0000-0000-000000000000", "status": "DONE"},
            {"id": second, "status": "IN_PROGRESS"}
        ]})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["status"], "DONE");
    assert!(results[1].is_null(), "missing task yields null, not failure");
    assert_eq!(results[2]["status"], "IN_PROGRESS");

    // the missing entry did not roll the others back
    let (_, body) = send(&app, "GET", &format!("/api/tasks/{first}"), Some(&token), None).await?;
    assert_eq!(body["data"]["status"], "DONE");

    let (status, _) = send(
        &app,
        "POST",
        "/api/tasks/bulk-update",
        Some(&token),
        Some(json!({"updates": []})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn assignable_users_are_available_only_and_sorted() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    create_user(&app, &token, "Zoe", "zoe@example.com", "available").await?;
    create_user(&app, &token, "Bob", "bob@example.com", "available").await?;
    create_user(&app, &token, "Mallory", "mallory@example.com", "not_available").await?;

    let (status, body) = send(&app, "GET", "/api/tasks/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    // admin is available too; Mallory is filtered out
    assert_eq!(names, vec!["Admin", "Bob", "Zoe"]);
    assert_eq!(body["pagination"]["totalItems"], 3);

    let (_, body) = send(&app, "GET", "/api/tasks/users?search=bob", Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["email"], "bob@example.com");

    Ok(())
}

#[tokio::test]
async fn deleting_an_assignee_leaves_the_task() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;
    let grace = create_user(&app, &token, "Grace", "grace@example.com", "available").await?;
    let task_id = create_task(&app, &token, json!({"title": "Handover", "assignedTo": grace})).await?;

    let (status, _) = send(&app, "DELETE", &format!("/api/user/{grace}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/api/tasks/{task_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["assigned_to"].is_null(), "dangling assignee resolves to null");

    Ok(())
}
