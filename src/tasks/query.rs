//! Query composition: loose request parameters -> validated query plan.
//!
//! The plan is a conjunction of tagged filter clauses, so invalid field
//! names or operators cannot reach the store. Sort fields are checked
//! against the enumerated set unconditionally; an unknown field is a
//! validation error, never passed through.

use serde::Deserialize;
use uuid::Uuid;

use super::TaskStatus;
use crate::error::ApiError;

/// Default page size for the main task listing.
pub const DEFAULT_LIST_LIMIT: i64 = 20;
/// Default page size for user-scoped dumps ("my tasks", "tasks by user").
pub const DEFAULT_USER_SCOPED_LIMIT: i64 = 50;
/// Hard ceiling on page size, bounding fetch and count cost.
pub const MAX_LIMIT: i64 = 100;

/// Sort keys accepted from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Title,
    Status,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Title => "title",
            Self::Status => "status",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            "title" => Some(Self::Title),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Columns usable in equality clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqField {
    Status,
    AssignedTo,
    CreatedBy,
}

impl EqField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::AssignedTo => "assigned_to",
            Self::CreatedBy => "created_by",
        }
    }
}

/// One filter clause. Clauses in a plan are combined by conjunction, so
/// the disjunctive clauses (`TextOr`, `OwnedBy`) stay correctly grouped
/// when they appear together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// `field = value`
    Eq { field: EqField, value: String },
    /// Case-insensitive substring over title OR description.
    TextOr { needle: String },
    /// Task is assigned to OR created by the user.
    OwnedBy { user: Uuid },
}

/// A validated, executable listing query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub clauses: Vec<Clause>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub page: i64,
    pub limit: i64,
}

impl QueryPlan {
    pub fn skip(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// Raw listing parameters as they arrive from the query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Raw filters for the user-scoped listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTaskFilters {
    pub status: Option<String>,
    pub search: Option<String>,
}

/// Build a plan for the main task listing.
pub fn build(params: &ListParams, default_limit: i64) -> Result<QueryPlan, ApiError> {
    let mut clauses = Vec::new();

    if let Some(status) = parse_status(params.status.as_deref())? {
        clauses.push(Clause::Eq {
            field: EqField::Status,
            value: status.as_str().to_string(),
        });
    }

    if let Some(raw) = nonempty(params.assigned_to.as_deref()) {
        let user = parse_user_id(raw)?;
        clauses.push(Clause::Eq {
            field: EqField::AssignedTo,
            value: user.to_string(),
        });
    }

    if let Some(raw) = nonempty(params.created_by.as_deref()) {
        let user = parse_user_id(raw)?;
        clauses.push(Clause::Eq {
            field: EqField::CreatedBy,
            value: user.to_string(),
        });
    }

    if let Some(needle) = nonempty(params.search.as_deref()) {
        clauses.push(Clause::TextOr {
            needle: needle.to_string(),
        });
    }

    let sort_by = match params.sort_by.as_deref() {
        None => SortField::CreatedAt,
        Some(raw) => SortField::parse(raw)
            .ok_or_else(|| ApiError::Validation("Invalid sort field".to_string()))?,
    };
    let sort_order = match params.sort_order.as_deref() {
        None => SortOrder::Desc,
        Some(raw) => SortOrder::parse(raw)
            .ok_or_else(|| ApiError::Validation("Invalid sort order".to_string()))?,
    };

    Ok(QueryPlan {
        clauses,
        sort_by,
        sort_order,
        page: params.page.unwrap_or(1).max(1),
        limit: params.limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT),
    })
}

/// Build a plan for tasks created by or assigned to `user`. Additional
/// filters are conjoined with the ownership disjunction, so a search
/// never widens the scope beyond the user's tasks.
pub fn build_for_user(user: Uuid, filters: &UserTaskFilters) -> Result<QueryPlan, ApiError> {
    let mut clauses = vec![Clause::OwnedBy { user }];

    if let Some(status) = parse_status(filters.status.as_deref())? {
        clauses.push(Clause::Eq {
            field: EqField::Status,
            value: status.as_str().to_string(),
        });
    }

    if let Some(needle) = nonempty(filters.search.as_deref()) {
        clauses.push(Clause::TextOr {
            needle: needle.to_string(),
        });
    }

    Ok(QueryPlan {
        clauses,
        sort_by: SortField::CreatedAt,
        sort_order: SortOrder::Desc,
        page: 1,
        limit: DEFAULT_USER_SCOPED_LIMIT,
    })
}

fn nonempty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_status(raw: Option<&str>) -> Result<Option<TaskStatus>, ApiError> {
    match nonempty(raw) {
        None => Ok(None),
        Some(raw) => TaskStatus::parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::Validation("Invalid status value".to_string())),
    }
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation("Invalid user ID".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let plan = build(&ListParams::default(), DEFAULT_LIST_LIMIT).unwrap();
        assert!(plan.clauses.is_empty());
        assert_eq!(plan.sort_by, SortField::CreatedAt);
        assert_eq!(plan.sort_order, SortOrder::Desc);
        assert_eq!(plan.page, 1);
        assert_eq!(plan.limit, DEFAULT_LIST_LIMIT);
        assert_eq!(plan.skip(), 0);
    }

    #[test]
    fn test_page_and_limit_are_clamped() {
        let plan = build(
            &ListParams {
                page: Some(-3),
                limit: Some(9999),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        )
        .unwrap();
        assert_eq!(plan.page, 1);
        assert_eq!(plan.limit, MAX_LIMIT);

        let plan = build(
            &ListParams {
                page: Some(4),
                limit: Some(25),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        )
        .unwrap();
        assert_eq!(plan.skip(), 75);
    }

    #[test]
    fn test_filters_become_clauses() {
        let user = Uuid::new_v4();
        let plan = build(
            &ListParams {
                status: Some("in_progress".to_string()),
                assigned_to: Some(user.to_string()),
                search: Some("  deploy  ".to_string()),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        )
        .unwrap();

        assert_eq!(plan.clauses.len(), 3);
        assert!(plan.clauses.contains(&Clause::Eq {
            field: EqField::Status,
            value: "in_progress".to_string(),
        }));
        assert!(plan.clauses.contains(&Clause::Eq {
            field: EqField::AssignedTo,
            value: user.to_string(),
        }));
        assert!(plan.clauses.contains(&Clause::TextOr {
            needle: "deploy".to_string(),
        }));
    }

    #[test]
    fn test_blank_filters_are_ignored() {
        let plan = build(
            &ListParams {
                search: Some("   ".to_string()),
                status: Some("".to_string()),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        )
        .unwrap();
        assert!(plan.clauses.is_empty());
    }

    #[test]
    fn test_unknown_sort_field_is_rejected() {
        let result = build(
            &ListParams {
                sort_by: Some("passwordHash".to_string()),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        );
        assert!(matches!(result, Err(ApiError::Validation(_))));

        let result = build(
            &ListParams {
                sort_order: Some("sideways".to_string()),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        );
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_invalid_status_and_user_filters_are_rejected() {
        let result = build(
            &ListParams {
                status: Some("archived".to_string()),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        );
        assert!(matches!(result, Err(ApiError::Validation(_))));

        let result = build(
            &ListParams {
                created_by: Some("not-a-uuid".to_string()),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        );
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_user_scope_conjoins_search_with_ownership() {
        // The search clause must be ANDed with the ownership disjunction,
        // not merged into a single flat OR.
        let user = Uuid::new_v4();
        let plan = build_for_user(
            user,
            &UserTaskFilters {
                status: Some("pending".to_string()),
                search: Some("foo".to_string()),
            },
        )
        .unwrap();

        assert_eq!(plan.clauses[0], Clause::OwnedBy { user });
        assert_eq!(plan.clauses.len(), 3);
        assert_eq!(plan.limit, DEFAULT_USER_SCOPED_LIMIT);
    }
}
