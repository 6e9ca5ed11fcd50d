//! Status transitions, soft delete and archive.
//!
//! Any status may move to any other. The only rule is the completion stamp:
//! entering `COMPLETED` sets `completed_at = now`, any other status clears it.

use super::tasks::require_task;
use super::{Database, now_ms};
use crate::context::TenantContext;
use crate::error::EngineResult;
use crate::types::{Task, TaskStatus};
use rusqlite::{Connection, params};
use tracing::info;

/// `completed_at` a task carries after moving to `next`.
pub fn completion_stamp(next: TaskStatus, now: i64) -> Option<i64> {
    (next == TaskStatus::Completed).then_some(now)
}

/// Write a status change. Shared by single-task and bulk paths.
pub(crate) fn apply_status_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    status: TaskStatus,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET status = ?1, completed_at = ?2, updated_by = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            status.as_str(),
            completion_stamp(status, now),
            ctx.user_id(),
            now,
            task_id
        ],
    )?;
    Ok(())
}

/// Flag a task deleted. Placements and edges stay; reads stop seeing it.
pub(crate) fn soft_delete_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET is_deleted = 1, deleted_at = ?1, updated_by = ?2, updated_at = ?1
         WHERE id = ?3",
        params![now, ctx.user_id(), task_id],
    )?;
    Ok(())
}

/// Flag a task archived. Archived tasks stay readable but drop out of
/// default listings.
pub(crate) fn archive_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET is_archived = 1, archived_at = COALESCE(archived_at, ?1),
                updated_by = ?2, updated_at = ?1
         WHERE id = ?3",
        params![now, ctx.user_id(), task_id],
    )?;
    Ok(())
}

impl Database {
    /// Move a task to `status`, maintaining the completion stamp.
    pub fn set_status(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        status: TaskStatus,
    ) -> EngineResult<Task> {
        let now = now_ms();
        let task = self.write_tx(|tx| {
            let before = require_task(tx, ctx, task_id)?;
            apply_status_internal(tx, ctx, task_id, status, now)?;
            info!(task_id, from = %before.status, to = %status, "task status changed");
            require_task(tx, ctx, task_id)
        })?;
        Ok(task)
    }

    /// Mark a task completed.
    pub fn complete(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Task> {
        self.set_status(ctx, task_id, TaskStatus::Completed)
    }

    /// Reopen a task as `TODO`, clearing its completion stamp.
    pub fn uncomplete(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Task> {
        self.set_status(ctx, task_id, TaskStatus::Todo)
    }

    /// Soft-delete a task. After this it is invisible to every read path.
    pub fn soft_delete(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<()> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            soft_delete_internal(tx, ctx, task_id, now)?;
            info!(task_id, "task soft-deleted");
            Ok(())
        })
    }

    /// Archive a task.
    pub fn archive(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            archive_internal(tx, ctx, task_id, now)?;
            info!(task_id, "task archived");
            require_task(tx, ctx, task_id)
        })
    }
}
