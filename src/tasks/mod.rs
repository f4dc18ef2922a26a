//! Task domain: records, lifecycle status, and field validation.
//!
//! A task is owned by its creator and assigned to exactly one user (who
//! may be the creator). Owner references are stored as ids and expanded
//! into displayable identities at the service boundary, never
//! denormalized at write time.

pub mod policy;
pub mod query;
pub mod service;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 1000;

/// Lifecycle status of a task.
///
/// Transitions are deliberately unconstrained: any authorized updater may
/// set any status, including reopening a completed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A task as persisted: owner references are raw ids.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a task. Status always starts as `pending`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub assigned_to: Uuid,
    pub created_by: Uuid,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Uuid>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.assigned_to.is_none()
    }
}

/// Validate and normalize a title before persistence.
pub fn validate_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("Title is required".to_string()));
    }
    if title.chars().count() > TITLE_MAX {
        return Err(ApiError::Validation(format!(
            "Title must be less than {} characters",
            TITLE_MAX
        )));
    }
    Ok(title.to_string())
}

/// Validate and normalize a description before persistence.
pub fn validate_description(raw: &str) -> Result<String, ApiError> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(ApiError::Validation("Description is required".to_string()));
    }
    if description.chars().count() > DESCRIPTION_MAX {
        return Err(ApiError::Validation(format!(
            "Description must be less than {} characters",
            DESCRIPTION_MAX
        )));
    }
    Ok(description.to_string())
}
