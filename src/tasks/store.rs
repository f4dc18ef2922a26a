//! Task collection: persistence and plan execution.
//!
//! The store validates field bounds before writing and renders query
//! plans into parameterized SQL. It never reaches across to the Identity
//! Directory; callers validate owner references first.

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::query::{Clause, QueryPlan};
use super::{validate_description, validate_title, NewTask, TaskPatch, TaskRecord, TaskStatus};
use crate::db::{self, Db};
use crate::error::ApiError;

/// Status counters for one scope, taken in a single snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
}

#[derive(Clone)]
pub struct TaskStore {
    db: Db,
}

impl TaskStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Persist a new task, assigning its id and timestamps.
    pub fn create(&self, new: NewTask) -> Result<TaskRecord, ApiError> {
        let now = Utc::now();
        let record = TaskRecord {
            id: Uuid::new_v4(),
            title: validate_title(&new.title)?,
            description: validate_description(&new.description)?,
            status: TaskStatus::Pending,
            assigned_to: new.assigned_to,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO tasks (id, title, description, status, assigned_to, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id.to_string(),
                record.title,
                record.description,
                record.status.as_str(),
                record.assigned_to.to_string(),
                record.created_by.to_string(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(record)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<TaskRecord>, ApiError> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                &format!("{} WHERE id = ?", SELECT_TASK),
                params![id.to_string()],
                row_to_task,
            )
            .optional()?;
        Ok(record)
    }

    /// Execute a query plan: one bounded fetch plus one count for the same
    /// filter set. Both run under the same connection lock, so the pair is
    /// a consistent snapshot barring interleaved writers.
    pub fn find_many(&self, plan: &QueryPlan) -> Result<(Vec<TaskRecord>, i64), ApiError> {
        let (where_sql, values) = render_clauses(&plan.clauses);

        let conn = self.db.lock();
        let sql = format!(
            "{} {} ORDER BY {} {} LIMIT {} OFFSET {}",
            SELECT_TASK,
            where_sql,
            plan.sort_by.column(),
            plan.sort_order.keyword(),
            plan.limit,
            plan.skip()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_task)?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;

        let count_sql = format!("SELECT COUNT(*) FROM tasks {}", where_sql);
        let total: i64 =
            conn.query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

        Ok((items, total))
    }

    /// Apply a partial update, re-validating every changed field, and
    /// return the stored record.
    pub fn update(&self, id: Uuid, patch: &TaskPatch) -> Result<TaskRecord, ApiError> {
        let mut set_parts = Vec::new();
        let mut values = Vec::new();

        if let Some(title) = &patch.title {
            set_parts.push("title = ?");
            values.push(validate_title(title)?);
        }
        if let Some(description) = &patch.description {
            set_parts.push("description = ?");
            values.push(validate_description(description)?);
        }
        if let Some(status) = patch.status {
            set_parts.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(assigned_to) = patch.assigned_to {
            set_parts.push("assigned_to = ?");
            values.push(assigned_to.to_string());
        }

        if !set_parts.is_empty() {
            set_parts.push("updated_at = ?");
            values.push(Utc::now().to_rfc3339());
            values.push(id.to_string());

            let sql = format!("UPDATE tasks SET {} WHERE id = ?", set_parts.join(", "));
            let conn = self.db.lock();
            conn.execute(&sql, params_from_iter(values.iter()))?;
        }

        self.find_by_id(id)?
            .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))
    }

    /// Remove a task. Returns whether a record was deleted.
    pub fn delete(&self, id: Uuid) -> Result<bool, ApiError> {
        let conn = self.db.lock();
        let affected = conn.execute("DELETE FROM tasks WHERE id = ?", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Count tasks by status, optionally restricted to tasks where the
    /// user is creator or assignee. One grouped query, one snapshot.
    pub fn aggregate_stats(&self, scope_user: Option<Uuid>) -> Result<TaskStats, ApiError> {
        let mut sql = String::from(
            "SELECT COUNT(*), \
             COALESCE(SUM(status = 'pending'), 0), \
             COALESCE(SUM(status = 'in_progress'), 0), \
             COALESCE(SUM(status = 'completed'), 0), \
             COALESCE(SUM(status = 'cancelled'), 0) \
             FROM tasks",
        );
        let mut values = Vec::new();
        if let Some(user) = scope_user {
            sql.push_str(" WHERE assigned_to = ? OR created_by = ?");
            values.push(user.to_string());
            values.push(user.to_string());
        }

        let conn = self.db.lock();
        let stats = conn.query_row(&sql, params_from_iter(values.iter()), |row| {
            Ok(TaskStats {
                total: row.get(0)?,
                pending: row.get(1)?,
                in_progress: row.get(2)?,
                completed: row.get(3)?,
                cancelled: row.get(4)?,
            })
        })?;
        Ok(stats)
    }
}

const SELECT_TASK: &str = "SELECT id, title, description, status, assigned_to, created_by, \
     created_at, updated_at FROM tasks";

fn row_to_task(row: &Row) -> rusqlite::Result<TaskRecord> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let assigned_to: String = row.get("assigned_to")?;
    let created_by: String = row.get("created_by")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(TaskRecord {
        id: db::parse_id(&id),
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::parse(&status).unwrap_or_default(),
        assigned_to: db::parse_id(&assigned_to),
        created_by: db::parse_id(&created_by),
        created_at: db::parse_timestamp(&created_at),
        updated_at: db::parse_timestamp(&updated_at),
    })
}

/// Render the plan's clauses into a WHERE fragment plus bound values.
/// Clauses are conjoined; disjunctions stay parenthesized inside their
/// clause.
fn render_clauses(clauses: &[Clause]) -> (String, Vec<String>) {
    if clauses.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut parts = Vec::new();
    let mut values = Vec::new();

    for clause in clauses {
        match clause {
            Clause::Eq { field, value } => {
                parts.push(format!("{} = ?", field.column()));
                values.push(value.clone());
            }
            Clause::TextOr { needle } => {
                parts.push(
                    "(title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')".to_string(),
                );
                let pattern = db::like_pattern(needle);
                values.push(pattern.clone());
                values.push(pattern);
            }
            Clause::OwnedBy { user } => {
                parts.push("(assigned_to = ? OR created_by = ?)".to_string());
                values.push(user.to_string());
                values.push(user.to_string());
            }
        }
    }

    (format!("WHERE {}", parts.join(" AND ")), values)
}
