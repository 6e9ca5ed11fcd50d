//! Sections: ordered buckets inside a project.
//!
//! Section positions are kept dense by the ledger's `Sections` bucket.
//! Deletion is a soft delete so placements can be re-keyed before the row
//! leaves the ordering.

use super::ledger::{self, Bucket};
use super::projects::require_project;
use super::tasks::touch_task_internal;
use super::{Database, new_id, now_ms};
use crate::context::TenantContext;
use crate::error::{EngineError, EngineResult};
use crate::types::Section;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

fn parse_section_row(row: &Row) -> rusqlite::Result<Section> {
    Ok(Section {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Live section that must belong to `project_id`.
///
/// A section of another project is a `BadRequest`; a missing or deleted
/// section is `NotFound`.
pub(crate) fn require_section(
    conn: &Connection,
    project_id: &str,
    section_id: &str,
) -> EngineResult<Section> {
    let section = conn
        .query_row(
            "SELECT * FROM sections WHERE id = ?1 AND is_deleted = 0",
            params![section_id],
            parse_section_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::section_not_found(section_id))?;

    if section.project_id != project_id {
        warn!(section_id, project_id, "section belongs to another project");
        return Err(EngineError::section_project_mismatch(section_id, project_id));
    }
    Ok(section)
}

fn ensure_unique_name(
    conn: &Connection,
    project_id: &str,
    name: &str,
    except_id: Option<&str>,
) -> EngineResult<()> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS (
            SELECT 1 FROM sections
            WHERE project_id = ?1 AND is_deleted = 0
              AND lower(name) = lower(?2) AND id IS NOT ?3
         )",
        params![project_id, name, except_id],
        |row| row.get(0),
    )?;
    if taken {
        return Err(EngineError::conflict(format!(
            "Section '{}' already exists in project {}",
            name, project_id
        ))
        .with_id(project_id));
    }
    Ok(())
}

fn validate_name(name: &str) -> EngineResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::bad_request("Section name must not be empty"));
    }
    Ok(name)
}

impl Database {
    /// Create a section, appended or inserted at `position`.
    pub fn create_section(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        name: &str,
        position: Option<i64>,
    ) -> EngineResult<Section> {
        let name = validate_name(name)?;
        let now = now_ms();
        self.write_tx(|tx| {
            require_project(tx, ctx, project_id)?;
            ensure_unique_name(tx, project_id, name, None)?;

            let id = new_id();
            let position = ledger::insert(tx, Bucket::sections(project_id), position)?;
            tx.execute(
                "INSERT INTO sections (id, project_id, name, position,
                                       created_by, created_at, updated_by, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5, ?6)",
                params![id, project_id, name, position, ctx.user_id(), now],
            )?;

            info!(section_id = %id, project_id, position, "section created");
            Ok(Section {
                id,
                project_id: project_id.to_string(),
                name: name.to_string(),
                position,
                created_at: now,
                updated_at: now,
            })
        })
    }

    pub fn rename_section(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        section_id: &str,
        name: &str,
    ) -> EngineResult<Section> {
        let name = validate_name(name)?;
        let now = now_ms();
        self.write_tx(|tx| {
            require_project(tx, ctx, project_id)?;
            let mut section = require_section(tx, project_id, section_id)?;
            ensure_unique_name(tx, project_id, name, Some(section_id))?;

            tx.execute(
                "UPDATE sections SET name = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
                params![name, ctx.user_id(), now, section_id],
            )?;

            info!(section_id, project_id, "section renamed");
            section.name = name.to_string();
            section.updated_at = now;
            Ok(section)
        })
    }

    /// Move a section to `new_position` among its project's sections.
    pub fn reorder_section(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        section_id: &str,
        new_position: i64,
    ) -> EngineResult<Section> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_project(tx, ctx, project_id)?;
            let mut section = require_section(tx, project_id, section_id)?;

            let position = ledger::move_item(
                tx,
                Bucket::sections(project_id),
                section_id,
                section.position,
                new_position,
            )?;
            tx.execute(
                "UPDATE sections SET updated_by = ?1, updated_at = ?2 WHERE id = ?3",
                params![ctx.user_id(), now, section_id],
            )?;

            info!(section_id, project_id, from = section.position, to = position, "section moved");
            section.position = position;
            section.updated_at = now;
            Ok(section)
        })
    }

    /// Delete a section.
    ///
    /// Its placements move to the project's unsectioned bucket, appended in
    /// their previous order. The tasks themselves are untouched apart from
    /// their audit pair.
    pub fn delete_section(
        &self,
        ctx: &TenantContext,
        project_id: &str,
        section_id: &str,
    ) -> EngineResult<()> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_project(tx, ctx, project_id)?;
            let section = require_section(tx, project_id, section_id)?;

            let task_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT task_id FROM task_projects
                     WHERE project_id = ?1 AND section_id = ?2
                     ORDER BY position",
                )?;
                let ids = stmt
                    .query_map(params![project_id, section_id], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                ids
            };

            let unsectioned = Bucket::placements(project_id, None);
            for task_id in &task_ids {
                let position = ledger::insert(tx, unsectioned, None)?;
                tx.execute(
                    "UPDATE task_projects SET section_id = NULL, position = ?1
                     WHERE task_id = ?2 AND project_id = ?3",
                    params![position, task_id, project_id],
                )?;
                touch_task_internal(tx, ctx, task_id, now)?;
            }

            tx.execute(
                "UPDATE sections SET is_deleted = 1, deleted_at = ?1, updated_by = ?2, updated_at = ?1
                 WHERE id = ?3",
                params![now, ctx.user_id(), section_id],
            )?;
            ledger::remove(tx, Bucket::sections(project_id), section.position)?;

            info!(section_id, project_id, moved = task_ids.len(), "section deleted");
            Ok(())
        })
    }

    /// Live sections of a project, by position.
    pub fn list_sections(&self, ctx: &TenantContext, project_id: &str) -> EngineResult<Vec<Section>> {
        self.with_conn(|conn| {
            require_project(conn, ctx, project_id)?;
            let mut stmt = conn.prepare(
                "SELECT * FROM sections WHERE project_id = ?1 AND is_deleted = 0 ORDER BY position",
            )?;
            let sections = stmt
                .query_map(params![project_id], parse_section_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sections)
        })
    }
}
