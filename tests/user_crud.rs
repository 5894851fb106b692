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

async fn create_role(app: &Router, token: &str, name: &str, permissions: Value) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/api/role",
        Some(token),
        Some(json!({"name": name, "permissions": permissions})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(body["data"]["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn admin_created_user_gets_temp_credentials() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    // no password in the payload -> generated, hashed, flagged
    let (status, body) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Grace", "email": "grace@example.com"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["is_admin_created"], true);
    assert_eq!(body["data"]["must_change_password"], true);
    assert!(body["data"].get("password_hash").is_none(), "hash must not leak");

    let hash: Option<String> =
        sqlx::query_scalar("SELECT password_hash FROM users WHERE email = 'grace@example.com'")
            .fetch_one(&pool)
            .await?;
    assert!(hash.is_some_and(|h| h.starts_with("$argon2")));

    Ok(())
}

#[tokio::test]
async fn user_create_normalizes_and_validates_email() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    let (status, body) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Grace", "email": "  Grace@Example.COM ", "password": "secret123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["email"], "grace@example.com");

    // same address in different case collides
    let (status, _) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Other", "email": "GRACE@example.com", "password": "secret123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Bad", "email": "not-an-email", "password": "secret123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn role_assignment_copies_a_permission_snapshot() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;
    let role_id = create_role(&app, &token, "Editor", json!([2, 3])).await?;

    let (status, body) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Grace", "email": "grace@example.com", "password": "secret123", "roleId": role_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["permissions"], json!([2, 3]));
    assert_eq!(body["data"]["role"]["name"], "Editor");
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    // editing the role later must not touch the user's snapshot
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/role/{role_id}"),
        Some(&token),
        Some(json!({"permissions": [1]})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", &format!("/api/user/{user_id}"), Some(&token), None).await?;
    assert_eq!(body["data"]["permissions"], json!([2, 3]));
    // the populated role view reflects the role's current codes
    assert_eq!(body["data"]["role"]["permissions"], json!([1]));

    // deleting the role leaves the user intact, with the role reference dangling
    let (status, _) = send(&app, "DELETE", &format!("/api/role/{role_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/api/user/{user_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["permissions"], json!([2, 3]));
    assert!(body["data"]["role"].is_null());

    Ok(())
}

#[tokio::test]
async fn null_role_id_clears_role_and_permissions() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;
    let role_id = create_role(&app, &token, "Editor", json!([3])).await?;

    let (_, body) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Grace", "email": "grace@example.com", "password": "secret123", "roleId": role_id})),
    )
    .await?;
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/user/{user_id}"),
        Some(&token),
        Some(json!({"roleId": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["role"].is_null());
    assert_eq!(body["data"]["permissions"], json!([]));

    // unknown role on update is a caller error
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/user/{user_id}"),
        Some(&token),
        Some(json!({"roleId": "00000000-0000-0000-0000-000000000000"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn user_update_requires_at_least_one_field() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    let (_, body) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Grace", "email": "grace@example.com", "password": "secret123"})),
    )
    .await?;
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/user/{user_id}"),
        Some(&token),
        Some(json!({})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["success"], false);

    Ok(())
}

#[tokio::test]
async fn user_list_filters_and_excludes_self() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    for (name, email, status_val) in [
        ("Grace", "grace@example.com", "available"),
        ("Linus", "linus@example.com", "not_available"),
    ] {
        let (status, _) = send(
            &app,
            "POST",
            "/api/user",
            Some(&token),
            Some(json!({"name": name, "email": email, "password": "secret123", "status": status_val})),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, "GET", "/api/user", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["totalItems"], 3); // admin included

    let (_, body) = send(&app, "GET", "/api/user?excludeSelf=true", Some(&token), None).await?;
    assert_eq!(body["pagination"]["totalItems"], 2);

    let (_, body) = send(&app, "GET", "/api/user?status=not_available", Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["name"], "Linus");

    let (_, body) = send(&app, "GET", "/api/user?search=grac", Some(&token), None).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["email"], "grace@example.com");

    Ok(())
}

#[tokio::test]
async fn deleted_user_is_echoed_back() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = admin_token(&app, &pool).await?;

    let (_, body) = send(
        &app,
        "POST",
        "/api/user",
        Some(&token),
        Some(json!({"name": "Grace", "email": "grace@example.com", "password": "secret123"})),
    )
    .await?;
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "DELETE", &format!("/api/user/{user_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "grace@example.com");

    let (status, _) = send(&app, "GET", &format!("/api/user/{user_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
