//! Placement manager: multi-homing of tasks into projects and sections.
//!
//! A task holds at most one placement per project. Every placement mutation
//! goes through the position ledger and stamps the task's audit pair.

use super::ledger::{self, Bucket};
use super::projects::require_project;
use super::sections::require_section;
use super::tasks::{parse_task_row, require_task, touch_task_internal};
use super::{Database, now_ms};
use crate::context::TenantContext;
use crate::error::{EngineError, EngineResult};
use crate::types::{Placement, PlacementTarget, Task};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

fn parse_placement_row(row: &Row) -> rusqlite::Result<Placement> {
    Ok(Placement {
        task_id: row.get("task_id")?,
        project_id: row.get("project_id")?,
        section_id: row.get("section_id")?,
        position: row.get("position")?,
        added_by: row.get("added_by")?,
        added_at: row.get("added_at")?,
    })
}

impl Placement {
    fn bucket(&self) -> Bucket<'_> {
        Bucket::placements(&self.project_id, self.section_id.as_deref())
    }
}

pub(crate) fn get_placement_internal(
    conn: &Connection,
    task_id: &str,
    project_id: &str,
) -> EngineResult<Option<Placement>> {
    let placement = conn
        .query_row(
            "SELECT * FROM task_projects WHERE task_id = ?1 AND project_id = ?2",
            params![task_id, project_id],
            parse_placement_row,
        )
        .optional()?;
    Ok(placement)
}

pub(crate) fn require_placement(
    conn: &Connection,
    task_id: &str,
    project_id: &str,
) -> EngineResult<Placement> {
    get_placement_internal(conn, task_id, project_id)?
        .ok_or_else(|| EngineError::placement_not_found(task_id, project_id))
}

/// Check a target's project and section without writing anything.
pub(crate) fn validate_target(
    conn: &Connection,
    ctx: &TenantContext,
    target: &PlacementTarget,
) -> EngineResult<()> {
    require_project(conn, ctx, &target.project_id)?;
    if let Some(section_id) = &target.section_id {
        require_section(conn, &target.project_id, section_id)?;
    }
    Ok(())
}

fn placements_internal(conn: &Connection, task_id: &str) -> EngineResult<Vec<Placement>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM task_projects WHERE task_id = ?1 ORDER BY added_at, project_id",
    )?;
    let placements = stmt
        .query_map(params![task_id], parse_placement_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(placements)
}

/// The projects a task is in, as unsectioned targets.
pub(crate) fn project_targets(
    conn: &Connection,
    task_id: &str,
) -> EngineResult<Vec<PlacementTarget>> {
    Ok(placements_internal(conn, task_id)?
        .into_iter()
        .map(|p| PlacementTarget::project(p.project_id))
        .collect())
}

/// Place a task into a project, appended or at `position`.
///
/// Fails with `Conflict` if the task is already in the project.
pub(crate) fn add_placement_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    target: &PlacementTarget,
    position: Option<i64>,
    now: i64,
) -> EngineResult<Placement> {
    validate_target(conn, ctx, target)?;
    if get_placement_internal(conn, task_id, &target.project_id)?.is_some() {
        warn!(task_id, project_id = %target.project_id, "duplicate placement rejected");
        return Err(EngineError::duplicate_placement(task_id, &target.project_id));
    }

    let bucket = Bucket::placements(&target.project_id, target.section_id.as_deref());
    let position = ledger::insert(conn, bucket, position)?;
    conn.execute(
        "INSERT INTO task_projects (task_id, project_id, section_id, position, added_by, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task_id,
            target.project_id,
            target.section_id,
            position,
            ctx.user_id(),
            now
        ],
    )?;
    touch_task_internal(conn, ctx, task_id, now)?;

    Ok(Placement {
        task_id: task_id.to_string(),
        project_id: target.project_id.clone(),
        section_id: target.section_id.clone(),
        position,
        added_by: ctx.user_id().to_string(),
        added_at: now,
    })
}

/// Detach a task from one project and close the gap it leaves.
pub(crate) fn remove_placement_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    project_id: &str,
    now: i64,
) -> EngineResult<()> {
    let placement = require_placement(conn, task_id, project_id)?;
    conn.execute(
        "DELETE FROM task_projects WHERE task_id = ?1 AND project_id = ?2",
        params![task_id, project_id],
    )?;
    ledger::remove(conn, placement.bucket(), placement.position)?;
    touch_task_internal(conn, ctx, task_id, now)
}

/// Re-key a placement to another section of the same project.
///
/// Without `new_position` the task is appended to the target bucket.
pub(crate) fn move_to_section_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    project_id: &str,
    section_id: Option<&str>,
    new_position: Option<i64>,
    now: i64,
) -> EngineResult<Placement> {
    let mut placement = require_placement(conn, task_id, project_id)?;
    if let Some(section_id) = section_id {
        require_section(conn, project_id, section_id)?;
    }

    let position = if placement.section_id.as_deref() == section_id {
        let last = ledger::count(conn, placement.bucket())? - 1;
        ledger::move_item(
            conn,
            placement.bucket(),
            task_id,
            placement.position,
            new_position.unwrap_or(last),
        )?
    } else {
        ledger::remove(conn, placement.bucket(), placement.position)?;
        let position = ledger::insert(conn, Bucket::placements(project_id, section_id), new_position)?;
        conn.execute(
            "UPDATE task_projects SET section_id = ?1, position = ?2
             WHERE task_id = ?3 AND project_id = ?4",
            params![section_id, position, task_id, project_id],
        )?;
        position
    };
    touch_task_internal(conn, ctx, task_id, now)?;

    placement.section_id = section_id.map(str::to_string);
    placement.position = position;
    Ok(placement)
}

/// Drop every placement of a task, then place it at `target`.
pub(crate) fn move_to_project_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    target: &PlacementTarget,
    now: i64,
) -> EngineResult<Placement> {
    validate_target(conn, ctx, target)?;
    for placement in placements_internal(conn, task_id)? {
        remove_placement_internal(conn, ctx, task_id, &placement.project_id, now)?;
    }
    add_placement_internal(conn, ctx, task_id, target, None, now)
}

impl Database {
    /// Add a task to a project, optionally into one of its sections.
    pub fn add_to_project(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        target: &PlacementTarget,
        position: Option<i64>,
    ) -> EngineResult<Placement> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            let placement = add_placement_internal(tx, ctx, task_id, target, position, now)?;
            info!(
                task_id,
                project_id = %placement.project_id,
                section_id = ?placement.section_id,
                position = placement.position,
                "task placed"
            );
            Ok(placement)
        })
    }

    /// Remove a task from one project. Its other placements are untouched.
    ///
    /// A task whose last placement goes away stays readable by id.
    pub fn remove_from_project(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        project_id: &str,
    ) -> EngineResult<()> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            require_project(tx, ctx, project_id)?;
            remove_placement_internal(tx, ctx, task_id, project_id, now)?;
            info!(task_id, project_id, "task removed from project");
            Ok(())
        })
    }

    /// Move a task to another section (or the unsectioned bucket) of a
    /// project it is already in.
    ///
    /// `new_position` is a raw ledger position: it counts placements of
    /// soft-deleted tasks, which `bucket_placements` does not show.
    pub fn move_to_section(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        project_id: &str,
        section_id: Option<&str>,
        new_position: Option<i64>,
    ) -> EngineResult<Placement> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            require_project(tx, ctx, project_id)?;
            let placement = move_to_section_internal(
                tx,
                ctx,
                task_id,
                project_id,
                section_id,
                new_position,
                now,
            )?;
            info!(
                task_id,
                project_id,
                section_id = ?placement.section_id,
                position = placement.position,
                "task moved"
            );
            Ok(placement)
        })
    }

    /// Replace all of a task's placements with one placement at `target`.
    pub fn move_to_project(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        target: &PlacementTarget,
    ) -> EngineResult<Placement> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            let placement = move_to_project_internal(tx, ctx, task_id, target, now)?;
            info!(task_id, project_id = %placement.project_id, "task moved to project");
            Ok(placement)
        })
    }

    /// Every placement of a task.
    pub fn placements_for_task(
        &self,
        ctx: &TenantContext,
        task_id: &str,
    ) -> EngineResult<Vec<Placement>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, task_id)?;
            placements_internal(conn, task_id)
        })
    }

    /// Placements in one bucket, by position. Soft-deleted tasks are hidden,
    /// so their slots show as gaps in the returned positions.
    pub fn bucket_placements(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        section_id: Option<&str>,
    ) -> EngineResult<Vec<Placement>> {
        self.with_conn(|conn| {
            require_project(conn, ctx, project_id)?;
            let mut stmt = conn.prepare(
                "SELECT tp.* FROM task_projects tp
                 JOIN live_tasks t ON t.id = tp.task_id
                 WHERE tp.project_id = ?1 AND tp.section_id IS ?2
                 ORDER BY tp.position",
            )?;
            let placements = stmt
                .query_map(params![project_id, section_id], parse_placement_row)?
                .collect::<Result<Vec<_>, _>>()?;
            debug!(project_id, ?section_id, count = placements.len(), "bucket read");
            Ok(placements)
        })
    }

    /// Live tasks in one bucket, by position.
    pub fn project_tasks(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        section_id: Option<&str>,
    ) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| {
            require_project(conn, ctx, project_id)?;
            let mut stmt = conn.prepare(
                "SELECT t.* FROM task_projects tp
                 JOIN live_tasks t ON t.id = tp.task_id
                 WHERE tp.project_id = ?1 AND tp.section_id IS ?2
                 ORDER BY tp.position",
            )?;
            let tasks = stmt
                .query_map(params![project_id, section_id], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }
}
