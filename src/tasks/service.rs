//! Task service: orchestration over the stores and the access policy.
//!
//! Validates referenced identities, gates mutations through the policy
//! engine, delegates listing to the query composer, and projects stored
//! records into response-ready views with owner references expanded.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::policy::{self, TaskAction};
use super::query::{self, ListParams, UserTaskFilters, DEFAULT_LIST_LIMIT};
use super::store::{TaskStats, TaskStore};
use super::{NewTask, TaskPatch, TaskRecord, TaskStatus};
use crate::error::ApiError;
use crate::identity::{Identity, UserStore};

/// A task owner reference expanded for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&Identity> for UserRef {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            name: identity.name.clone(),
            email: identity.email.clone(),
        }
    }
}

/// A task as returned to callers, with both owner references expanded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: UserRef,
    pub created_by: UserRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One page of the task listing plus its pagination facts.
#[derive(Debug, Clone)]
pub struct TaskListPage {
    pub tasks: Vec<TaskView>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

/// Validated input for task creation.
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub title: String,
    pub description: String,
    pub assigned_to: Uuid,
}

#[derive(Clone)]
pub struct TaskService {
    tasks: TaskStore,
    users: UserStore,
}

impl TaskService {
    pub fn new(tasks: TaskStore, users: UserStore) -> Self {
        Self { tasks, users }
    }

    /// Create a task after checking both owner references resolve.
    pub fn create_task(&self, data: CreateTask, creator: Uuid) -> Result<TaskView, ApiError> {
        let assignee = self
            .users
            .find_by_id(data.assigned_to)?
            .ok_or_else(|| ApiError::NotFound("Assigned user not found".to_string()))?;
        let creator_identity = self
            .users
            .find_by_id(creator)?
            .ok_or_else(|| ApiError::NotFound("Creator user not found".to_string()))?;

        let record = self.tasks.create(NewTask {
            title: data.title,
            description: data.description,
            assigned_to: assignee.id,
            created_by: creator_identity.id,
        })?;

        let mut identities = HashMap::new();
        identities.insert(assignee.id, assignee);
        identities.insert(creator_identity.id, creator_identity);
        project(record, &identities)
    }

    /// List tasks per the composed plan; returns the page plus totals.
    pub fn list_tasks(&self, params: &ListParams) -> Result<TaskListPage, ApiError> {
        let plan = query::build(params, DEFAULT_LIST_LIMIT)?;
        let (items, total) = self.tasks.find_many(&plan)?;
        let tasks = self.expand(items)?;

        Ok(TaskListPage {
            tasks,
            total,
            page: plan.page,
            limit: plan.limit,
            total_pages: (total + plan.limit - 1) / plan.limit,
        })
    }

    /// Fetch one task by id. Single reads are permitted for any
    /// authenticated requester; the policy check documents that choice.
    pub fn get_task(&self, id: Uuid, requester: Uuid) -> Result<TaskView, ApiError> {
        let record = self.fetch(id)?;
        policy::decide(requester, &record, TaskAction::ReadSingle)
            .map_err(|_| ApiError::Forbidden("You don't have permission to view this task".to_string()))?;
        self.expand_one(record)
    }

    /// Apply a partial update; only the creator or the assignee may
    /// update, and a changed assignee must resolve in the directory.
    pub fn update_task(
        &self,
        id: Uuid,
        patch: TaskPatch,
        requester: Uuid,
    ) -> Result<TaskView, ApiError> {
        let record = self.fetch(id)?;

        policy::decide(requester, &record, TaskAction::Update).map_err(|denial| {
            tracing::warn!(
                task = %record.id,
                requester = %requester,
                reason = denial.as_str(),
                "task update denied"
            );
            ApiError::Forbidden("You don't have permission to update this task".to_string())
        })?;

        if let Some(new_assignee) = patch.assigned_to {
            self.users
                .find_by_id(new_assignee)?
                .ok_or_else(|| ApiError::NotFound("Assigned user not found".to_string()))?;
        }

        let updated = self.tasks.update(record.id, &patch)?;
        self.expand_one(updated)
    }

    /// Remove a task; only its creator may do so.
    pub fn delete_task(&self, id: Uuid, requester: Uuid) -> Result<(), ApiError> {
        let record = self.fetch(id)?;

        policy::decide(requester, &record, TaskAction::Delete).map_err(|denial| {
            tracing::warn!(
                task = %record.id,
                requester = %requester,
                reason = denial.as_str(),
                "task delete denied"
            );
            ApiError::Forbidden("You don't have permission to delete this task".to_string())
        })?;

        self.tasks.delete(record.id)?;
        Ok(())
    }

    /// Tasks created by or assigned to `user`, with optional status and
    /// search filters conjoined to the ownership scope.
    pub fn list_tasks_for_user(
        &self,
        user: Uuid,
        filters: &UserTaskFilters,
    ) -> Result<Vec<TaskView>, ApiError> {
        let plan = query::build_for_user(user, filters)?;
        let (items, _) = self.tasks.find_many(&plan)?;
        self.expand(items)
    }

    /// Status counters, optionally scoped to one user's tasks.
    pub fn stats(&self, scope_user: Option<Uuid>) -> Result<TaskStats, ApiError> {
        self.tasks.aggregate_stats(scope_user)
    }

    fn fetch(&self, id: Uuid) -> Result<TaskRecord, ApiError> {
        self.tasks
            .find_by_id(id)?
            .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))
    }

    fn expand_one(&self, record: TaskRecord) -> Result<TaskView, ApiError> {
        let mut views = self.expand(vec![record])?;
        views
            .pop()
            .ok_or_else(|| ApiError::Internal(anyhow!("expansion dropped a record")))
    }

    /// Expand owner references for a result set with one batched
    /// directory lookup.
    fn expand(&self, records: Vec<TaskRecord>) -> Result<Vec<TaskView>, ApiError> {
        let mut ids: Vec<Uuid> = Vec::new();
        for record in &records {
            if !ids.contains(&record.assigned_to) {
                ids.push(record.assigned_to);
            }
            if !ids.contains(&record.created_by) {
                ids.push(record.created_by);
            }
        }

        let identities = self.users.find_by_ids(&ids)?;
        records
            .into_iter()
            .map(|record| project(record, &identities))
            .collect()
    }
}

fn project(record: TaskRecord, identities: &HashMap<Uuid, Identity>) -> Result<TaskView, ApiError> {
    let assigned_to = identities
        .get(&record.assigned_to)
        .map(UserRef::from)
        .ok_or_else(|| missing_reference(record.id, record.assigned_to))?;
    let created_by = identities
        .get(&record.created_by)
        .map(UserRef::from)
        .ok_or_else(|| missing_reference(record.id, record.created_by))?;

    Ok(TaskView {
        id: record.id,
        title: record.title,
        description: record.description,
        status: record.status,
        assigned_to,
        created_by,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn missing_reference(task: Uuid, user: Uuid) -> ApiError {
    ApiError::Internal(anyhow!("task {} references unknown user {}", task, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::identity::NewIdentity;

    struct Fixture {
        service: TaskService,
        users: UserStore,
        db: Db,
    }

    fn fixture() -> Fixture {
        let db = Db::in_memory().unwrap();
        let users = UserStore::new(db.clone());
        let service = TaskService::new(TaskStore::new(db.clone()), users.clone());
        Fixture { service, users, db }
    }

    fn register(fixture: &Fixture, email: &str, name: &str) -> Uuid {
        fixture
            .users
            .create(NewIdentity {
                email: email.to_string(),
                name: name.to_string(),
                password_hash: "hash".to_string(),
            })
            .unwrap()
            .id
    }

    fn create(data_title: &str, fixture: &Fixture, assignee: Uuid, creator: Uuid) -> TaskView {
        fixture
            .service
            .create_task(
                CreateTask {
                    title: data_title.to_string(),
                    description: format!("{} description", data_title),
                    assigned_to: assignee,
                },
                creator,
            )
            .unwrap()
    }

    #[test]
    fn test_create_rejects_unknown_references() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");

        let result = fx.service.create_task(
            CreateTask {
                title: "t".to_string(),
                description: "d".to_string(),
                assigned_to: Uuid::new_v4(),
            },
            u1,
        );
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let result = fx.service.create_task(
            CreateTask {
                title: "t".to_string(),
                description: "d".to_string(),
                assigned_to: u1,
            },
            Uuid::new_v4(),
        );
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_create_update_forbid_delete_scenario() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let u2 = register(&fx, "u2@example.com", "U2");
        let u3 = register(&fx, "u3@example.com", "U3");

        // U1 creates a task assigned to U2.
        let view = fx
            .service
            .create_task(
                CreateTask {
                    title: "Write spec".to_string(),
                    description: "Draft design doc".to_string(),
                    assigned_to: u2,
                },
                u1,
            )
            .unwrap();
        assert_eq!(view.status, TaskStatus::Pending);
        assert_eq!(view.created_by.id, u1);
        assert_eq!(view.assigned_to.id, u2);
        assert_eq!(view.assigned_to.email, "u2@example.com");

        // U2 (assignee) moves it to in_progress.
        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        let updated = fx.service.update_task(view.id, patch.clone(), u2).unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);

        // U3 (unrelated) is denied the same update.
        let denied = fx.service.update_task(view.id, patch, u3);
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));

        // U2 (assignee, not creator) may not delete.
        let denied = fx.service.delete_task(view.id, u2);
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));

        // U1 (creator) deletes; subsequent reads are NotFound for anyone.
        fx.service.delete_task(view.id, u1).unwrap();
        let gone = fx.service.get_task(view.id, u2);
        assert!(matches!(gone, Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_get_task_is_permissive_for_unrelated_requester() {
        // Deliberate policy choice: single-task reads are not restricted
        // to creator/assignee.
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let u2 = register(&fx, "u2@example.com", "U2");
        let u3 = register(&fx, "u3@example.com", "U3");

        let view = create("visible", &fx, u2, u1);
        let fetched = fx.service.get_task(view.id, u3).unwrap();
        assert_eq!(fetched.id, view.id);
    }

    #[test]
    fn test_get_task_is_idempotent() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let view = create("stable", &fx, u1, u1);

        let first = fx.service.get_task(view.id, u1).unwrap();
        let second = fx.service.get_task(view.id, u1).unwrap();
        assert_eq!(first.title, second.title);
        assert_eq!(first.status, second.status);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[test]
    fn test_status_transitions_are_unconstrained() {
        // Reopening a completed task is allowed; the lifecycle is not
        // enforced as a state machine.
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let view = create("loop", &fx, u1, u1);

        for status in [
            TaskStatus::Completed,
            TaskStatus::Pending,
            TaskStatus::Cancelled,
        ] {
            let updated = fx
                .service
                .update_task(
                    view.id,
                    TaskPatch {
                        status: Some(status),
                        ..Default::default()
                    },
                    u1,
                )
                .unwrap();
            assert_eq!(updated.status, status);
        }
    }

    #[test]
    fn test_update_reassignment_revalidates_assignee() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let u2 = register(&fx, "u2@example.com", "U2");
        let view = create("handoff", &fx, u1, u1);

        let result = fx.service.update_task(
            view.id,
            TaskPatch {
                assigned_to: Some(Uuid::new_v4()),
                ..Default::default()
            },
            u1,
        );
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let updated = fx
            .service
            .update_task(
                view.id,
                TaskPatch {
                    assigned_to: Some(u2),
                    ..Default::default()
                },
                u1,
            )
            .unwrap();
        assert_eq!(updated.assigned_to.id, u2);

        // The new assignee is now an authorized updater.
        let by_assignee = fx.service.update_task(
            view.id,
            TaskPatch {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
            u2,
        );
        assert!(by_assignee.is_ok());
    }

    #[test]
    fn test_updates_are_last_write_wins() {
        // Known race: update is read-then-check-then-write with no version
        // token, so overlapping updates to the same task resolve to
        // whichever write lands last, per field. Exercised sequentially
        // here; the interleaved case has the same outcome.
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let u2 = register(&fx, "u2@example.com", "U2");
        let view = create("contended", &fx, u2, u1);

        fx.service
            .update_task(
                view.id,
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    ..Default::default()
                },
                u1,
            )
            .unwrap();
        let second = fx
            .service
            .update_task(
                view.id,
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    title: Some("renamed".to_string()),
                    ..Default::default()
                },
                u2,
            )
            .unwrap();

        assert_eq!(second.status, TaskStatus::Cancelled);
        assert_eq!(second.title, "renamed");
    }

    #[test]
    fn test_list_tasks_pagination_invariants() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        for i in 0..45 {
            create(&format!("task {}", i), &fx, u1, u1);
        }

        let page = fx
            .service
            .list_tasks(&ListParams {
                page: Some(3),
                limit: Some(20),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);
        // Last page carries the remainder: min(limit, total - skip).
        assert_eq!(page.tasks.len(), 5);

        let empty = fx.service.list_tasks(&ListParams::default()).unwrap();
        assert_eq!(empty.page, 1);
        assert_eq!(empty.limit, 20);
        assert_eq!(empty.tasks.len(), 20);
    }

    #[test]
    fn test_list_tasks_for_user_composition() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let u2 = register(&fx, "u2@example.com", "U2");

        // Owned by u1, matches "foo".
        fx.service
            .create_task(
                CreateTask {
                    title: "foo one".to_string(),
                    description: "d".to_string(),
                    assigned_to: u2,
                },
                u1,
            )
            .unwrap();
        // Assigned to u1, matches "foo" in the description.
        fx.service
            .create_task(
                CreateTask {
                    title: "other".to_string(),
                    description: "contains FOO too".to_string(),
                    assigned_to: u1,
                },
                u2,
            )
            .unwrap();
        // Unrelated to u1 despite matching.
        fx.service
            .create_task(
                CreateTask {
                    title: "foo three".to_string(),
                    description: "d".to_string(),
                    assigned_to: u2,
                },
                u2,
            )
            .unwrap();

        let tasks = fx
            .service
            .list_tasks_for_user(
                u1,
                &UserTaskFilters {
                    status: None,
                    search: Some("foo".to_string()),
                },
            )
            .unwrap();

        assert_eq!(tasks.len(), 2);
        assert!(tasks
            .iter()
            .all(|t| t.assigned_to.id == u1 || t.created_by.id == u1));
    }

    #[test]
    fn test_stats_scoping() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U1");
        let u2 = register(&fx, "u2@example.com", "U2");

        create("one", &fx, u1, u1);
        create("two", &fx, u2, u1);
        create("three", &fx, u2, u2);

        let global = fx.service.stats(None).unwrap();
        assert_eq!(global.total, 3);

        let scoped = fx.service.stats(Some(u1)).unwrap();
        assert_eq!(scoped.total, 2);
    }

    #[test]
    fn test_view_serializes_with_expanded_references() {
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "U One");
        let view = create("wire shape", &fx, u1, u1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["assignedTo"]["email"], "u1@example.com");
        assert_eq!(json["createdBy"]["name"], "U One");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn test_name_changes_are_reflected_without_task_rewrites() {
        // References are expanded at read time, so a directory edit shows
        // up in task views without touching the task rows.
        let fx = fixture();
        let u1 = register(&fx, "u1@example.com", "Old Name");
        let view = create("renamed owner", &fx, u1, u1);

        {
            let conn = fx.db.lock();
            conn.execute(
                "UPDATE users SET name = 'New Name' WHERE id = ?",
                rusqlite::params![u1.to_string()],
            )
            .unwrap();
        }
        assert_eq!(fx.users.find_by_id(u1).unwrap().unwrap().name, "New Name");

        let fetched = fx.service.get_task(view.id, u1).unwrap();
        assert_eq!(fetched.created_by.name, "New Name");
        assert_eq!(fetched.assigned_to.name, "New Name");
    }
}
