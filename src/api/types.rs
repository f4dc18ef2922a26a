//! Wire types: the response envelope and request/response DTOs.
//!
//! Every endpoint answers with the same envelope:
//! `{success, data, message, statusCode}` plus `meta.pagination` on
//! listing endpoints and `error.{code}` on failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;

// ─────────────────────────────────────────────────────────────────────────────
// Response envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ApiMeta>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self::with_status(data, message, 200)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(data, message, 201)
    }

    pub fn with_status(data: T, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error: None,
            status_code,
            meta: None,
        }
    }

    pub fn paginated(data: T, pagination: PaginationMeta, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error: None,
            status_code: 200,
            meta: Some(ApiMeta { pagination }),
        }
    }
}

impl ApiResponse<serde_json::Value> {
    pub fn error(message: impl Into<String>, status_code: u16, code: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            error: Some(ApiErrorBody {
                code: code.to_string(),
            }),
            status_code,
            meta: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// A user with the credential fields stripped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Identity> for UserView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            name: identity.name.clone(),
            created_at: identity.created_at,
            updated_at: identity.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserView,
    pub token: String,
    pub refresh_token: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub assigned_to: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
}

/// Listing payload: items plus the filter-set total; page facts ride in
/// `meta.pagination`.
#[derive(Debug, Serialize)]
pub struct TasksData {
    pub tasks: Vec<crate::tasks::service::TaskView>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub user_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UsersData {
    pub users: Vec<UserView>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let body = ApiResponse::error("Task not found", 404, "NOT_FOUND");
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["statusCode"], 404);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn test_paginated_envelope_shape() {
        let body = ApiResponse::paginated(
            vec![1, 2, 3],
            PaginationMeta {
                page: 2,
                limit: 3,
                total: 7,
                total_pages: 3,
            },
            "Data retrieved successfully",
        );
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["meta"]["pagination"]["totalPages"], 3);
        assert!(json.get("error").is_none());
    }
}
