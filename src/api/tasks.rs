//! Task endpoints.
//!
//! Handlers stay thin: parse and validate the wire shape, hand off to the
//! task service, wrap the result in the response envelope.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::auth::AuthUser;
use super::routes::AppState;
use super::types::{
    ApiResponse, CreateTaskRequest, PaginationMeta, StatsQuery, TasksData, UpdateTaskRequest,
};
use crate::error::ApiError;
use crate::tasks::query::{ListParams, UserTaskFilters};
use crate::tasks::service::CreateTask;
use crate::tasks::{TaskPatch, TaskStatus};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", axum::routing::post(create_task).get(list_tasks))
        .route(
            "/:task_id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/user/:user_id", get(user_tasks))
        .route("/my/tasks", get(my_tasks))
        .route("/stats/all", get(all_stats))
        .route("/stats/user", get(user_stats))
}

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation("Invalid task ID".to_string()))
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation("Invalid user ID".to_string()))
}

fn to_patch(req: UpdateTaskRequest) -> Result<TaskPatch, ApiError> {
    let status = match req.status.as_deref() {
        None => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::Validation("Invalid status value".to_string()))?,
        ),
    };
    let assigned_to = match req.assigned_to.as_deref() {
        None => None,
        Some(raw) => Some(parse_user_id(raw)?),
    };

    Ok(TaskPatch {
        title: req.title,
        description: req.description,
        status,
        assigned_to,
    })
}

/// POST /api/tasks - Create a task owned by the requester.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let assigned_to = parse_user_id(&req.assigned_to)?;

    let task = state.service.create_task(
        CreateTask {
            title: req.title,
            description: req.description,
            assigned_to,
        },
        user.id,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::created(task, "Task created successfully")),
    ))
}

/// GET /api/tasks - Filtered, sorted, paginated listing.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.service.list_tasks(&params)?;

    let pagination = PaginationMeta {
        page: page.page,
        limit: page.limit,
        total: page.total,
        total_pages: page.total_pages,
    };
    let data = TasksData {
        tasks: page.tasks,
        total: page.total,
    };

    Ok(Json(ApiResponse::paginated(
        data,
        pagination,
        "Tasks retrieved successfully",
    )))
}

/// GET /api/tasks/:task_id
async fn get_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;
    let task = state.service.get_task(id, user.id)?;
    Ok(Json(ApiResponse::success(task, "Task retrieved successfully")))
}

/// PUT /api/tasks/:task_id
async fn update_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;
    let patch = to_patch(req)?;
    let task = state.service.update_task(id, patch, user.id)?;
    Ok(Json(ApiResponse::success(task, "Task updated successfully")))
}

/// DELETE /api/tasks/:task_id
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;
    state.service.delete_task(id, user.id)?;
    Ok(Json(ApiResponse::success((), "Task deleted successfully")))
}

/// GET /api/tasks/user/:user_id - Tasks created by or assigned to a user.
async fn user_tasks(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(filters): Query<UserTaskFilters>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_user_id(&user_id)?;
    let tasks = state.service.list_tasks_for_user(id, &filters)?;
    Ok(Json(ApiResponse::success(
        tasks,
        "User tasks retrieved successfully",
    )))
}

/// GET /api/tasks/my/tasks - The requester's own task scope.
async fn my_tasks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(filters): Query<UserTaskFilters>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.service.list_tasks_for_user(user.id, &filters)?;
    Ok(Json(ApiResponse::success(
        tasks,
        "My tasks retrieved successfully",
    )))
}

/// GET /api/tasks/stats/all - Global status counters.
async fn all_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.service.stats(None)?;
    Ok(Json(ApiResponse::success(
        stats,
        "All task statistics retrieved successfully",
    )))
}

/// GET /api/tasks/stats/user - Counters scoped to a user, defaulting to
/// the requester.
async fn user_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let target = match query.user_id.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_user_id(raw.trim())?,
        _ => user.id,
    };
    let stats = state.service.stats(Some(target))?;
    Ok(Json(ApiResponse::success(
        stats,
        "Task statistics retrieved successfully",
    )))
}
