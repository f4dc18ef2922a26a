//! Access policy: which identities may perform which actions on a task.
//!
//! Pure decision logic, no I/O. Comparison is on parsed ids, so textual
//! and binary representations of the same identifier agree.

use uuid::Uuid;

use super::TaskRecord;

/// The action a requester intends to perform on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    /// Fetch a single task by id. Any authenticated requester is allowed;
    /// listings are scoped elsewhere.
    ReadSingle,
    /// Mutate any field of the task.
    Update,
    /// Remove the task.
    Delete,
}

/// Why an action was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Update requires the requester to be the creator or the assignee.
    NotOwnerOrAssignee,
    /// Delete requires the requester to be the creator.
    NotCreator,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotOwnerOrAssignee => "not-owner-or-assignee",
            Self::NotCreator => "not-creator",
        }
    }
}

/// Decide whether `requester` may perform `action` on `task`.
pub fn decide(requester: Uuid, task: &TaskRecord, action: TaskAction) -> Result<(), Denial> {
    match action {
        TaskAction::ReadSingle => Ok(()),
        TaskAction::Update => {
            if requester == task.created_by || requester == task.assigned_to {
                Ok(())
            } else {
                Err(Denial::NotOwnerOrAssignee)
            }
        }
        TaskAction::Delete => {
            if requester == task.created_by {
                Ok(())
            } else {
                Err(Denial::NotCreator)
            }
        }
    }
}
