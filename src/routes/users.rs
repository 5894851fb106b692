use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::UserManagement;
use crate::errors::{AppError, AppResult};
use crate::models::user::{
    DbUser, RoleRef, User, UserCreateRequest, UserListQuery, UserStatus, UserUpdateRequest,
};
use crate::models::ApiResponse;
use crate::pagination::{PageMeta, PageQuery};
use crate::routes::auth::{ensure_email_available, fetch_user_by_id};
use crate::utils::{generate_temp_password, hash_password, is_valid_email, normalize_email, utc_now};

#[utoipa::path(
    post,
    path = "/api/user",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    UserManagement(_principal): UserManagement,
    Json(req): Json<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let (Some(name), Some(email)) = (name, req.email.as_deref()) else {
        return Err(AppError::bad_request("name and email are required"));
    };

    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("invalid email format"));
    }
    ensure_email_available(&state.pool, &email, None).await?;

    // Role is resolved up front; its permission codes are copied onto the user
    // as a snapshot (later role edits do not propagate).
    let mut permissions = "[]".to_string();
    if let Some(role_id) = req.role_id {
        let role = fetch_role_ref(&state.pool, role_id)
            .await?
            .ok_or_else(|| AppError::bad_request("role not found"))?;
        permissions =
            serde_json::to_string(&role.permissions).map_err(|err| AppError::internal(err.to_string()))?;
    }

    // Caller-supplied password, or an admin-generated temporary one that is
    // mailed out and must be changed on first sign-in.
    let (password_hash, is_admin_created, temp_password) = match req.password.as_deref() {
        Some(password) => (hash_password(password)?, false, None),
        None => {
            let temp = generate_temp_password();
            (hash_password(&temp)?, true, Some(temp))
        }
    };

    let id = Uuid::new_v4();
    let now = utc_now();
    let status = req.status.unwrap_or(UserStatus::Available);
    let picture = req.picture.unwrap_or_default();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, picture, is_external_auth, email_verified, \
         status, role_id, permissions, is_admin_created, must_change_password, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .bind(&picture)
    .bind(status.as_str())
    .bind(req.role_id.map(|r| r.to_string()))
    .bind(&permissions)
    .bind(is_admin_created)
    .bind(is_admin_created)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    if let Some(temp) = temp_password {
        // Credential mail is best effort; a mail outage must not lose the account.
        if let Err(err) = state.mailer.send_temp_password(&email, name, &temp).await {
            tracing::warn!(email = %email, error = %err, "failed to send credentials email");
        }
    }

    let user = load_user(&state.pool, id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(user).with_message("User created successfully")),
    ))
}

#[utoipa::path(
    get,
    path = "/api/user",
    tag = "Users",
    responses((status = 200, description = "Paginated user list", body = [User])),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    UserManagement(principal): UserManagement,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    let page_query = PageQuery { page: query.page, limit: query.limit };
    let (page, limit, offset) = (page_query.page(), page_query.limit(), page_query.offset());

    let mut clauses = Vec::new();
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = search.map(|s| format!("%{s}%"));

    if pattern.is_some() {
        clauses.push("(name LIKE ? OR email LIKE ?)");
    }
    if query.status.is_some() {
        clauses.push("status = ?");
    }
    if query.exclude_self.unwrap_or(false) {
        clauses.push("id != ?");
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(1) FROM users{where_sql}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(pattern) = &pattern {
        count_query = count_query.bind(pattern.clone()).bind(pattern.clone());
    }
    if let Some(status) = query.status {
        count_query = count_query.bind(status.as_str());
    }
    if query.exclude_self.unwrap_or(false) {
        count_query = count_query.bind(principal.id.to_string());
    }
    let total: i64 = count_query.fetch_one(&state.pool).await?;

    let list_sql = format!("SELECT * FROM users{where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?");
    let mut q = sqlx::query_as::<_, DbUser>(&list_sql);
    if let Some(pattern) = &pattern {
        q = q.bind(pattern.clone()).bind(pattern.clone());
    }
    if let Some(status) = query.status {
        q = q.bind(status.as_str());
    }
    if query.exclude_self.unwrap_or(false) {
        q = q.bind(principal.id.to_string());
    }
    let rows = q.bind(limit).bind(offset).fetch_all(&state.pool).await?;

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        let role = populated_role(&state.pool, row.role_id.as_deref()).await?;
        users.push(row.into_user(role)?);
    }

    Ok(Json(
        ApiResponse::ok(users).with_pagination(PageMeta::new(page, limit, total)),
    ))
}

#[utoipa::path(
    get,
    path = "/api/user/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User detail", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    UserManagement(_principal): UserManagement,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = load_user(&state.pool, id).await?;
    Ok(Json(ApiResponse::ok(user)))
}

#[utoipa::path(
    put,
    path = "/api/user/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    UserManagement(_principal): UserManagement,
    Path(id): Path<Uuid>,
    Json(req): Json<UserUpdateRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    if req.is_empty() {
        return Err(AppError::bad_request("at least one field is required"));
    }

    let mut user = fetch_user_by_id(&state.pool, id).await?;

    if let Some(name) = req.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("name cannot be empty"));
        }
        user.name = name;
    }

    if let Some(email) = req.email {
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(AppError::bad_request("invalid email format"));
        }
        if email != user.email {
            ensure_email_available(&state.pool, &email, Some(id)).await?;
        }
        user.email = email;
    }

    if let Some(status) = req.status {
        user.status = status.as_str().to_string();
    }

    if let Some(picture) = req.picture {
        user.picture = picture;
    }

    match req.role_id {
        None => {}
        // null or "" clears the assignment and zeroes the snapshot
        Some(None) => {
            user.role_id = None;
            user.permissions = "[]".to_string();
        }
        Some(Some(raw)) if raw.trim().is_empty() => {
            user.role_id = None;
            user.permissions = "[]".to_string();
        }
        Some(Some(raw)) => {
            let role_id = Uuid::parse_str(raw.trim())
                .map_err(|_| AppError::bad_request("invalid role id format"))?;
            let role = fetch_role_ref(&state.pool, role_id)
                .await?
                .ok_or_else(|| AppError::bad_request("role not found"))?;
            user.role_id = Some(role_id.to_string());
            user.permissions = serde_json::to_string(&role.permissions)
                .map_err(|err| AppError::internal(err.to_string()))?;
        }
    }

    let now = utc_now();
    sqlx::query(
        "UPDATE users SET name = ?, email = ?, status = ?, picture = ?, role_id = ?, permissions = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.status)
    .bind(&user.picture)
    .bind(&user.role_id)
    .bind(&user.permissions)
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let user = load_user(&state.pool, id).await?;

    Ok(Json(ApiResponse::ok(user).with_message("User updated successfully")))
}

#[utoipa::path(
    delete,
    path = "/api/user/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    UserManagement(_principal): UserManagement,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = load_user(&state.pool, id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    Ok(Json(ApiResponse::ok(user).with_message("User deleted successfully")))
}

/// Fetches the public view with the role populated.
pub async fn load_user(pool: &SqlitePool, id: Uuid) -> AppResult<User> {
    let row = fetch_user_by_id(pool, id).await?;
    let role = populated_role(pool, row.role_id.as_deref()).await?;
    row.into_user(role)
}

pub async fn populated_role(pool: &SqlitePool, role_id: Option<&str>) -> AppResult<Option<RoleRef>> {
    let Some(role_id) = role_id else {
        return Ok(None);
    };
    let id = Uuid::parse_str(role_id)
        .map_err(|err| AppError::internal(format!("corrupt role id '{role_id}': {err}")))?;
    fetch_role_ref(pool, id).await
}

async fn fetch_role_ref(pool: &SqlitePool, id: Uuid) -> AppResult<Option<RoleRef>> {
    let row: Option<(String, String, String)> =
        sqlx::query_as("SELECT id, name, permissions FROM roles WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;

    let Some((raw_id, name, permissions)) = row else {
        return Ok(None);
    };

    Ok(Some(RoleRef {
        id: Uuid::parse_str(&raw_id)
            .map_err(|err| AppError::internal(format!("corrupt role id '{raw_id}': {err}")))?,
        name,
        permissions: serde_json::from_str(&permissions)
            .map_err(|err| AppError::internal(format!("corrupt role permissions: {err}")))?,
    }))
}
