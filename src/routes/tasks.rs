use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use futures::future::join_all;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::TaskManagement;
use crate::errors::{AppError, AppResult};
use crate::models::task::{
    Assignee, AssignableUsersQuery, BulkUpdateRequest, DbTask, Task, TaskCreateRequest,
    TaskListQuery, TaskPriority, TaskStatus, TaskUpdateRequest, MAX_TITLE_LENGTH,
};
use crate::models::user::{AssignableUser, UserStatus};
use crate::models::ApiResponse;
use crate::pagination::{PageMeta, PageQuery};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/api/tasks",
    tag = "Tasks",
    responses((status = 200, description = "Filtered task list", body = [Task])),
    security(("bearerAuth" = []))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    TaskManagement(_principal): TaskManagement,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Task>>>> {
    let mut clauses = Vec::new();
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = search.map(|s| format!("%{s}%"));

    if pattern.is_some() {
        clauses.push("(title LIKE ? OR description LIKE ?)");
    }
    if query.assigned_to.is_some() {
        clauses.push("assigned_to = ?");
    }
    if query.status.is_some() {
        clauses.push("status = ?");
    }
    if query.priority.is_some() {
        clauses.push("priority = ?");
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT * FROM tasks{where_sql} ORDER BY created_at DESC");

    let mut q = sqlx::query_as::<_, DbTask>(&sql);
    if let Some(pattern) = &pattern {
        q = q.bind(pattern.clone()).bind(pattern.clone());
    }
    if let Some(assigned_to) = query.assigned_to {
        q = q.bind(assigned_to.to_string());
    }
    if let Some(status) = query.status {
        q = q.bind(status.as_str());
    }
    if let Some(priority) = query.priority {
        q = q.bind(priority.as_str());
    }
    let rows = q.fetch_all(&state.pool).await?;

    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let assignee = fetch_assignee(&state.pool, row.assigned_to.as_deref()).await?;
        tasks.push(row.into_task(assignee)?);
    }

    Ok(Json(ApiResponse::ok(tasks)))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task detail", body = Task),
        (status = 404, description = "Task not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_task(
    State(state): State<AppState>,
    TaskManagement(_principal): TaskManagement,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Task>>> {
    let task = load_task(&state.pool, id).await?;
    Ok(Json(ApiResponse::ok(task)))
}

#[utoipa::path(
    post,
    path = "/api/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Missing title or unknown assignee")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_task(
    State(state): State<AppState>,
    TaskManagement(principal): TaskManagement,
    Json(req): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Task>>)> {
    let title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .ok_or_else(|| AppError::bad_request("title is required"))?;
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AppError::bad_request("title cannot exceed 200 characters"));
    }

    // Assignee must exist at write time; nothing is persisted otherwise.
    if let Some(assigned_to) = req.assigned_to {
        ensure_user_exists(&state.pool, assigned_to).await?;
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let status = req.status.unwrap_or(TaskStatus::Todo);
    let priority = req.priority.unwrap_or(TaskPriority::Medium);
    let description = req.description.unwrap_or_default().trim().to_string();
    let tags = serde_json::to_string(&req.tags.unwrap_or_default())
        .map_err(|err| AppError::internal(err.to_string()))?;
    let subtasks = serde_json::to_string(&req.subtasks.unwrap_or_default())
        .map_err(|err| AppError::internal(err.to_string()))?;

    sqlx::query(
        "INSERT INTO tasks (id, title, description, status, priority, assigned_to, created_by, \
         due_date, tags, subtasks, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(title)
    .bind(&description)
    .bind(status.as_str())
    .bind(priority.as_str())
    .bind(req.assigned_to.map(|u| u.to_string()))
    .bind(principal.id.to_string())
    .bind(req.due_date)
    .bind(&tags)
    .bind(&subtasks)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let task = load_task(&state.pool, id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(task).with_message("Task created successfully")),
    ))
}

#[utoipa::path(
    put,
    path = "/api/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 404, description = "Task not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_task(
    State(state): State<AppState>,
    TaskManagement(_principal): TaskManagement,
    Path(id): Path<Uuid>,
    Json(req): Json<TaskUpdateRequest>,
) -> AppResult<Json<ApiResponse<Task>>> {
    let mut task = fetch_task(&state.pool, id).await?;

    if let Some(title) = req.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::bad_request("title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(AppError::bad_request("title cannot exceed 200 characters"));
        }
        task.title = title;
    }
    if let Some(description) = req.description {
        task.description = description.trim().to_string();
    }
    if let Some(status) = req.status {
        task.status = status.as_str().to_string();
    }
    if let Some(priority) = req.priority {
        task.priority = priority.as_str().to_string();
    }
    match req.assigned_to {
        None => {}
        Some(None) => task.assigned_to = None,
        Some(Some(user_id)) => {
            ensure_user_exists(&state.pool, user_id).await?;
            task.assigned_to = Some(user_id.to_string());
        }
    }
    if let Some(due_date) = req.due_date {
        task.due_date = Some(due_date);
    }
    if let Some(tags) = req.tags {
        task.tags = serde_json::to_string(&tags).map_err(|err| AppError::internal(err.to_string()))?;
    }
    if let Some(subtasks) = req.subtasks {
        task.subtasks =
            serde_json::to_string(&subtasks).map_err(|err| AppError::internal(err.to_string()))?;
    }

    let now = utc_now();
    sqlx::query(
        "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?, assigned_to = ?, \
         due_date = ?, tags = ?, subtasks = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.status)
    .bind(&task.priority)
    .bind(&task.assigned_to)
    .bind(task.due_date)
    .bind(&task.tags)
    .bind(&task.subtasks)
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let task = load_task(&state.pool, id).await?;

    Ok(Json(ApiResponse::ok(task).with_message("Task updated successfully")))
}

#[utoipa::path(
    delete,
    path = "/api/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task deleted"),
        (status = 404, description = "Task not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    TaskManagement(_principal): TaskManagement,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    let affected = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("task not found"));
    }

    Ok(Json(ApiResponse::message("Task deleted successfully")))
}

#[utoipa::path(
    post,
    path = "/api/tasks/bulk-update",
    tag = "Tasks",
    request_body = BulkUpdateRequest,
    responses(
        (status = 200, description = "Per-item results, input order preserved", body = [Task]),
        (status = 400, description = "Empty or missing updates array")
    ),
    security(("bearerAuth" = []))
)]
pub async fn bulk_update_status(
    State(state): State<AppState>,
    TaskManagement(_principal): TaskManagement,
    Json(req): Json<BulkUpdateRequest>,
) -> AppResult<Json<ApiResponse<Vec<Option<Task>>>>> {
    let updates = req
        .updates
        .filter(|updates| !updates.is_empty())
        .ok_or_else(|| AppError::bad_request("updates array is required and must not be empty"))?;

    // Independent concurrent writes, no transaction: one missing task must not
    // roll back the rest. join_all keeps the input order in the output.
    let now = utc_now();
    let results = join_all(updates.into_iter().map(|update| {
        let pool = state.pool.clone();
        async move {
            let applied = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
                .bind(update.status.as_str())
                .bind(now)
                .bind(update.id.to_string())
                .execute(&pool)
                .await;

            match applied {
                Ok(result) if result.rows_affected() > 0 => load_task(&pool, update.id).await.ok(),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(task_id = %update.id, error = %err, "bulk status update failed");
                    None
                }
            }
        }
    }))
    .await;

    Ok(Json(ApiResponse::ok(results).with_message("Tasks updated successfully")))
}

#[utoipa::path(
    get,
    path = "/api/tasks/users",
    tag = "Tasks",
    responses((status = 200, description = "Paginated assignable users", body = [AssignableUser])),
    security(("bearerAuth" = []))
)]
pub async fn list_assignable_users(
    State(state): State<AppState>,
    TaskManagement(_principal): TaskManagement,
    Query(query): Query<AssignableUsersQuery>,
) -> AppResult<Json<ApiResponse<Vec<AssignableUser>>>> {
    let page_query = PageQuery { page: query.page, limit: query.limit };
    let (page, limit, offset) = (page_query.page(), page_query.limit(), page_query.offset());

    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = search.map(|s| format!("%{s}%"));

    let (total, rows): (i64, Vec<(String, String, String, String, String, Option<String>)>) =
        match &pattern {
            Some(pattern) => {
                let total = sqlx::query_scalar(
                    "SELECT COUNT(1) FROM users WHERE status = 'available' AND (name LIKE ? OR email LIKE ?)",
                )
                .bind(pattern)
                .bind(pattern)
                .fetch_one(&state.pool)
                .await?;

                let rows = sqlx::query_as(
                    "SELECT u.id, u.name, u.email, u.picture, u.status, r.name \
                     FROM users u LEFT JOIN roles r ON r.id = u.role_id \
                     WHERE u.status = 'available' AND (u.name LIKE ? OR u.email LIKE ?) \
                     ORDER BY u.name ASC LIMIT ? OFFSET ?",
                )
                .bind(pattern)
                .bind(pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&state.pool)
                .await?;
                (total, rows)
            }
            None => {
                let total = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE status = 'available'")
                    .fetch_one(&state.pool)
                    .await?;

                let rows = sqlx::query_as(
                    "SELECT u.id, u.name, u.email, u.picture, u.status, r.name \
                     FROM users u LEFT JOIN roles r ON r.id = u.role_id \
                     WHERE u.status = 'available' ORDER BY u.name ASC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&state.pool)
                .await?;
                (total, rows)
            }
        };

    let mut users = Vec::with_capacity(rows.len());
    for (id, name, email, picture, status, role) in rows {
        users.push(AssignableUser {
            id: Uuid::parse_str(&id)
                .map_err(|err| AppError::internal(format!("corrupt user id '{id}': {err}")))?,
            name,
            email,
            picture,
            status: UserStatus::from_str(&status)?,
            role,
        });
    }

    Ok(Json(
        ApiResponse::ok(users).with_pagination(PageMeta::new(page, limit, total)),
    ))
}

async fn fetch_task(pool: &SqlitePool, id: Uuid) -> AppResult<DbTask> {
    sqlx::query_as::<_, DbTask>("SELECT * FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))
}

/// Fetches the public view with the assignee populated.
async fn load_task(pool: &SqlitePool, id: Uuid) -> AppResult<Task> {
    let row = fetch_task(pool, id).await?;
    let assignee = fetch_assignee(pool, row.assigned_to.as_deref()).await?;
    row.into_task(assignee)
}

/// Reduced assignee projection; a dangling reference (user deleted since
/// assignment) resolves to none rather than an error.
async fn fetch_assignee(pool: &SqlitePool, user_id: Option<&str>) -> AppResult<Option<Assignee>> {
    let Some(user_id) = user_id else {
        return Ok(None);
    };

    let row: Option<(String, String, String, String, String)> =
        sqlx::query_as("SELECT id, name, email, picture, status FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    let Some((id, name, email, picture, status)) = row else {
        return Ok(None);
    };

    Ok(Some(Assignee {
        id: Uuid::parse_str(&id)
            .map_err(|err| AppError::internal(format!("corrupt user id '{id}': {err}")))?,
        name,
        email,
        picture,
        status: UserStatus::from_str(&status)?,
    }))
}

async fn ensure_user_exists(pool: &SqlitePool, user_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await?;

    if count == 0 {
        return Err(AppError::bad_request("assigned user not found"));
    }

    Ok(())
}
