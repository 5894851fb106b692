use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::RoleManagement;
use crate::errors::{AppError, AppResult};
use crate::models::role::{DbRole, Role, RoleCreateRequest, RoleListQuery, RoleUpdateRequest};
use crate::models::ApiResponse;
use crate::pagination::{PageMeta, PageQuery};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/api/role/permissions",
    tag = "Roles",
    responses((status = 200, description = "Permission name to code map")),
    security(("bearerAuth" = []))
)]
pub async fn get_permissions(
    State(state): State<AppState>,
    RoleManagement(_principal): RoleManagement,
) -> AppResult<Json<ApiResponse<BTreeMap<String, i64>>>> {
    Ok(Json(ApiResponse::ok(state.permissions.as_map().clone())))
}

#[utoipa::path(
    post,
    path = "/api/role",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    RoleManagement(_principal): RoleManagement,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Role>>)> {
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let (Some(name), Some(permissions)) = (name, req.permissions) else {
        return Err(AppError::bad_request("name and permissions are required"));
    };

    if !state.permissions.is_valid_set(&permissions) {
        return Err(AppError::bad_request("invalid permission codes"));
    }

    ensure_role_name_available(&state.pool, name, None).await?;

    let description = req.description.unwrap_or_default().trim().to_string();
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO roles (id, name, description, permissions, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(&description)
    .bind(serde_json::to_string(&permissions).map_err(|err| AppError::internal(err.to_string()))?)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role: Role = fetch_role(&state.pool, id).await?.try_into()?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(role).with_message("Role created successfully")),
    ))
}

#[utoipa::path(
    get,
    path = "/api/role",
    tag = "Roles",
    responses((status = 200, description = "Paginated role list", body = [Role])),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    RoleManagement(_principal): RoleManagement,
    Query(query): Query<RoleListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Role>>>> {
    let page_query = PageQuery { page: query.page, limit: query.limit };
    let (page, limit, offset) = (page_query.page(), page_query.limit(), page_query.offset());

    // Sort column is whitelisted, never interpolated from raw input.
    let sort_by = match query.sort_by.as_deref() {
        Some("name") => "name",
        Some("updated_at") | Some("updatedAt") => "updated_at",
        _ => "created_at",
    };
    let sort_order = match query.sort_order.as_deref() {
        Some("asc") => "ASC",
        _ => "DESC",
    };

    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = search.map(|s| format!("%{s}%"));

    let (total, rows) = match &pattern {
        Some(pattern) => {
            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM roles WHERE name LIKE ? OR description LIKE ?",
            )
            .bind(pattern)
            .bind(pattern)
            .fetch_one(&state.pool)
            .await?;

            let sql = format!(
                "SELECT * FROM roles WHERE name LIKE ? OR description LIKE ? ORDER BY {sort_by} {sort_order} LIMIT ? OFFSET ?"
            );
            let rows = sqlx::query_as::<_, DbRole>(&sql)
                .bind(pattern)
                .bind(pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&state.pool)
                .await?;
            (total, rows)
        }
        None => {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles")
                .fetch_one(&state.pool)
                .await?;

            let sql = format!("SELECT * FROM roles ORDER BY {sort_by} {sort_order} LIMIT ? OFFSET ?");
            let rows = sqlx::query_as::<_, DbRole>(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&state.pool)
                .await?;
            (total, rows)
        }
    };

    let roles: Vec<Role> = rows.into_iter().map(Role::try_from).collect::<Result<_, _>>()?;

    Ok(Json(
        ApiResponse::ok(roles).with_pagination(PageMeta::new(page, limit, total)),
    ))
}

#[utoipa::path(
    get,
    path = "/api/role/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role detail", body = Role),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    RoleManagement(_principal): RoleManagement,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Role>>> {
    let role: Role = fetch_role(&state.pool, id).await?.try_into()?;
    Ok(Json(ApiResponse::ok(role)))
}

#[utoipa::path(
    put,
    path = "/api/role/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    RoleManagement(_principal): RoleManagement,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleUpdateRequest>,
) -> AppResult<Json<ApiResponse<Role>>> {
    if req.name.is_none() && req.description.is_none() && req.permissions.is_none() {
        return Err(AppError::bad_request(
            "at least one field (name, description, or permissions) is required",
        ));
    }

    if let Some(permissions) = &req.permissions {
        if !state.permissions.is_valid_set(permissions) {
            return Err(AppError::bad_request("invalid permission codes"));
        }
    }

    let mut role = fetch_role(&state.pool, id).await?;

    if let Some(name) = req.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("name cannot be empty"));
        }
        // Uniqueness only re-checked when the name actually changes.
        if name.to_lowercase() != role.name.to_lowercase() {
            ensure_role_name_available(&state.pool, &name, Some(id)).await?;
        }
        role.name = name;
    }

    if let Some(description) = req.description {
        role.description = description.trim().to_string();
    }

    if let Some(permissions) = req.permissions {
        role.permissions =
            serde_json::to_string(&permissions).map_err(|err| AppError::internal(err.to_string()))?;
    }

    let now = utc_now();
    sqlx::query("UPDATE roles SET name = ?, description = ?, permissions = ?, updated_at = ? WHERE id = ?")
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.permissions)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let role: Role = fetch_role(&state.pool, id).await?.try_into()?;

    Ok(Json(ApiResponse::ok(role).with_message("Role updated successfully")))
}

#[utoipa::path(
    delete,
    path = "/api/role/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role deleted"),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    RoleManagement(_principal): RoleManagement,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    let _ = fetch_role(&state.pool, id).await?;

    // Users keep their copied permission snapshot; deletion does not cascade.
    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    Ok(Json(ApiResponse::message("Role deleted successfully")))
}

async fn fetch_role(pool: &SqlitePool, id: Uuid) -> AppResult<DbRole> {
    sqlx::query_as::<_, DbRole>("SELECT * FROM roles WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))
}

async fn ensure_role_name_available(pool: &SqlitePool, name: &str, exclude: Option<Uuid>) -> AppResult<()> {
    let count: i64 = match exclude {
        Some(id) => {
            sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE lower(name) = lower(?) AND id != ?")
                .bind(name)
                .bind(id.to_string())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE lower(name) = lower(?)")
                .bind(name)
                .fetch_one(pool)
                .await?
        }
    };

    if count > 0 {
        return Err(AppError::conflict("role with this name already exists"));
    }

    Ok(())
}
