//! User directory endpoints: browse other users, view a profile.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::auth::AuthUser;
use super::routes::AppState;
use super::types::{ApiResponse, ListUsersQuery, PaginationMeta, UserView, UsersData};
use crate::error::ApiError;
use crate::identity::UserQuery;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users))
        .route("/:user_id", get(get_user_profile))
}

/// GET /api/users - Everyone but the requester, searchable, paginated.
async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.users.search(
        &UserQuery {
            page: query.page,
            limit: query.limit,
            search: query.search,
        },
        user.id,
    )?;

    let pagination = PaginationMeta {
        page: page.page,
        limit: page.limit,
        total: page.total,
        total_pages: page.total_pages,
    };
    let data = UsersData {
        users: page.users.iter().map(UserView::from).collect(),
        total: page.total,
    };

    Ok(Json(ApiResponse::paginated(
        data,
        pagination,
        "Users retrieved successfully",
    )))
}

/// GET /api/users/:user_id
async fn get_user_profile(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::parse_str(&user_id)
        .map_err(|_| ApiError::Validation("Invalid user ID".to_string()))?;

    let identity = state
        .users
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(ApiResponse::success(
        UserView::from(&identity),
        "User profile retrieved successfully",
    )))
}
