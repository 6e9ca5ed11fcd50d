//! Project CRUD.

use super::{Database, new_id, now_ms};
use crate::context::TenantContext;
use crate::error::{EngineError, EngineResult};
use crate::types::Project;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        name: row.get("name")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Project in the caller's workspace, or `NotFound`.
pub(crate) fn require_project(
    conn: &Connection,
    ctx: &TenantContext,
    project_id: &str,
) -> EngineResult<Project> {
    conn.query_row(
        "SELECT * FROM projects WHERE id = ?1 AND workspace_id = ?2",
        params![project_id, ctx.workspace_id()],
        parse_project_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::project_not_found(project_id))
}

impl Database {
    pub fn create_project(&self, ctx: &TenantContext, name: &str) -> EngineResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::bad_request("Project name must not be empty"));
        }

        let project = Project {
            id: new_id(),
            workspace_id: ctx.workspace_id().to_string(),
            name: name.to_string(),
            created_by: ctx.user_id().to_string(),
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        self.write_tx(|tx| {
            tx.execute(
                "INSERT INTO projects (id, workspace_id, name, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    project.id,
                    project.workspace_id,
                    project.name,
                    project.created_by,
                    project.created_at,
                    project.updated_at,
                ],
            )?;
            Ok(())
        })?;

        info!(project_id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    pub fn get_project(&self, ctx: &TenantContext, project_id: &str) -> EngineResult<Project> {
        self.with_conn(|conn| require_project(conn, ctx, project_id))
    }

    /// Projects in the caller's workspace, oldest first.
    pub fn list_projects(&self, ctx: &TenantContext) -> EngineResult<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM projects WHERE workspace_id = ?1 ORDER BY created_at, id",
            )?;
            let projects = stmt
                .query_map(params![ctx.workspace_id()], parse_project_row)?
                .collect::<Result<Vec<_>, _>>()?;
            debug!(count = projects.len(), "listed projects");
            Ok(projects)
        })
    }

    /// Delete a project. Its sections and placements go with it; the tasks stay.
    pub fn delete_project(&self, ctx: &TenantContext, project_id: &str) -> EngineResult<()> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_project(tx, ctx, project_id)?;

            // audit stamp on every task losing a placement
            tx.execute(
                "UPDATE tasks SET updated_by = ?1, updated_at = ?2
                 WHERE id IN (SELECT task_id FROM task_projects WHERE project_id = ?3)",
                params![ctx.user_id(), now, project_id],
            )?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;

            info!(project_id, "project deleted");
            Ok(())
        })
    }
}
