use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::UserStatus;

pub const MAX_TITLE_LENGTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Done => "DONE",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, AppError> {
        match value {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "REVIEW" => Ok(TaskStatus::Review),
            "DONE" => Ok(TaskStatus::Done),
            other => Err(AppError::internal(format!("corrupt task status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, AppError> {
        match value {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            other => Err(AppError::internal(format!("corrupt task priority '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

/// Assignee projection embedded in task payloads.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Assignee {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub picture: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<Assignee>,
    pub created_by: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub subtasks: Vec<Subtask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: String,
    pub subtasks: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbTask {
    pub fn into_task(self, assignee: Option<Assignee>) -> Result<Task, AppError> {
        Ok(Task {
            id: Uuid::parse_str(&self.id)
                .map_err(|err| AppError::internal(format!("corrupt task id '{}': {err}", self.id)))?,
            title: self.title,
            description: self.description,
            status: TaskStatus::from_str(&self.status)?,
            priority: TaskPriority::from_str(&self.priority)?,
            assigned_to: assignee,
            created_by: Uuid::parse_str(&self.created_by)
                .map_err(|err| AppError::internal(format!("corrupt task creator id: {err}")))?,
            due_date: self.due_date,
            tags: serde_json::from_str(&self.tags)
                .map_err(|err| AppError::internal(format!("corrupt task tags: {err}")))?,
            subtasks: serde_json::from_str(&self.subtasks)
                .map_err(|err| AppError::internal(format!("corrupt task subtasks: {err}")))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Define launch checklist")]
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(alias = "assignedTo")]
    pub assigned_to: Option<Uuid>,
    #[serde(alias = "dueDate")]
    #[schema(format = DateTime, example = "2025-10-10T10:00:00Z")]
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub subtasks: Option<Vec<Subtask>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// Absent = untouched; null = unassign; a uuid = reassign (re-validated).
    #[serde(default, alias = "assignedTo", deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub assigned_to: Option<Option<Uuid>>,
    #[serde(alias = "dueDate")]
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub subtasks: Option<Vec<Subtask>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkStatusUpdate {
    pub id: Uuid,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkUpdateRequest {
    pub updates: Option<Vec<BulkStatusUpdate>>,
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub search: Option<String>,
    #[serde(alias = "assignedTo")]
    pub assigned_to: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Deserialize)]
pub struct AssignableUsersQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
