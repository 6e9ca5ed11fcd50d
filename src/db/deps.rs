//! Dependency edges and cycle detection.
//!
//! An edge `predecessor -> task` is stored as `(task_id, predecessor_id)`.
//! Before insertion the full set of tasks reachable from `task` along
//! successor edges is computed in one recursive query; the edge is refused
//! when `predecessor` is in that set. The start node is part of the set, so
//! a self edge is refused by the same check.

use super::tasks::require_task;
use super::{Database, now_ms, parse_column};
use crate::context::TenantContext;
use crate::error::{EngineError, EngineResult};
use crate::types::{DependencyEdge, DependencyType};
use rusqlite::{Connection, Row, params};
use tracing::{debug, info, warn};

fn parse_edge_row(row: &Row) -> rusqlite::Result<DependencyEdge> {
    let dep_type: String = row.get("dep_type")?;
    Ok(DependencyEdge {
        predecessor_id: row.get("predecessor_id")?,
        successor_id: row.get("task_id")?,
        dep_type: parse_column::<DependencyType>(dep_type)?,
        lag_days: row.get("lag_days")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

/// Outcome of a bounded reachability walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reach {
    Found,
    NotFound,
    /// The walk hit the node cap before finishing.
    Exhausted,
}

/// Is `target` reachable from `start` along successor edges?
///
/// `UNION` keeps the visited set, so existing cycles in malformed data
/// terminate. The `LIMIT` admits one row past `max_nodes`; seeing that row
/// means the walk did not finish within the cap.
pub(crate) fn reachable(
    conn: &Connection,
    start: &str,
    target: &str,
    max_nodes: u32,
) -> EngineResult<Reach> {
    let (visited, found): (i64, bool) = conn.query_row(
        "WITH RECURSIVE reach(id) AS (
            SELECT ?1
            UNION
            SELECT d.task_id
            FROM task_dependencies d
            JOIN reach r ON d.predecessor_id = r.id
            LIMIT ?3
         )
         SELECT COUNT(*), COALESCE(MAX(id = ?2), 0) FROM reach",
        params![start, target, i64::from(max_nodes) + 1],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    debug!(start, target, visited, found, "reachability walk");
    Ok(if found {
        Reach::Found
    } else if visited > i64::from(max_nodes) {
        Reach::Exhausted
    } else {
        Reach::NotFound
    })
}

/// Refuse an edge `predecessor_id -> task_id` that would close a cycle.
pub(crate) fn check_acyclic(
    conn: &Connection,
    task_id: &str,
    predecessor_id: &str,
    max_nodes: u32,
) -> EngineResult<()> {
    match reachable(conn, task_id, predecessor_id, max_nodes)? {
        Reach::NotFound => Ok(()),
        Reach::Found => {
            warn!(task_id, predecessor_id, "dependency cycle rejected");
            Err(EngineError::dependency_cycle(predecessor_id, task_id))
        }
        Reach::Exhausted => {
            warn!(task_id, predecessor_id, max_nodes, "reachability cap hit");
            Err(EngineError::conflict(format!(
                "Could not verify that {} -> {} is acyclic within {} tasks",
                predecessor_id, task_id, max_nodes
            ))
            .with_id(predecessor_id)
            .with_id(task_id))
        }
    }
}

impl Database {
    /// Make `predecessor_id` a predecessor of `task_id`.
    ///
    /// Re-adding an existing edge replaces its type and lag.
    pub fn add_dependency(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        predecessor_id: &str,
        dep_type: DependencyType,
        lag_days: i32,
    ) -> EngineResult<DependencyEdge> {
        let max_nodes = self.graph_limits().max_reachability_nodes;
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            require_task(tx, ctx, predecessor_id)?;
            check_acyclic(tx, task_id, predecessor_id, max_nodes)?;

            tx.execute(
                "INSERT INTO task_dependencies
                    (task_id, predecessor_id, dep_type, lag_days, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task_id, predecessor_id)
                 DO UPDATE SET dep_type = excluded.dep_type, lag_days = excluded.lag_days",
                params![
                    task_id,
                    predecessor_id,
                    dep_type.as_str(),
                    lag_days,
                    ctx.user_id(),
                    now
                ],
            )?;

            let edge = tx.query_row(
                "SELECT * FROM task_dependencies WHERE task_id = ?1 AND predecessor_id = ?2",
                params![task_id, predecessor_id],
                parse_edge_row,
            )?;
            info!(task_id, predecessor_id, %dep_type, lag_days, "dependency added");
            Ok(edge)
        })
    }

    /// Remove an edge. Removing an edge that does not exist is a no-op.
    pub fn remove_dependency(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        predecessor_id: &str,
    ) -> EngineResult<()> {
        self.write_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM task_dependencies
                 WHERE task_id = ?1 AND predecessor_id = ?2
                   AND task_id IN (SELECT id FROM tasks WHERE workspace_id = ?3)",
                params![task_id, predecessor_id, ctx.workspace_id()],
            )?;
            if removed > 0 {
                info!(task_id, predecessor_id, "dependency removed");
            }
            Ok(())
        })
    }

    /// Edges naming the predecessors of `task_id`.
    pub fn list_dependencies(
        &self,
        ctx: &TenantContext,
        task_id: &str,
    ) -> EngineResult<Vec<DependencyEdge>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, task_id)?;
            let mut stmt = conn.prepare(
                "SELECT d.* FROM task_dependencies d
                 JOIN live_tasks p ON p.id = d.predecessor_id
                 WHERE d.task_id = ?1
                 ORDER BY d.created_at, d.predecessor_id",
            )?;
            let edges = stmt
                .query_map(params![task_id], parse_edge_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(edges)
        })
    }

    /// Edges naming the successors of `task_id`.
    pub fn list_dependents(
        &self,
        ctx: &TenantContext,
        task_id: &str,
    ) -> EngineResult<Vec<DependencyEdge>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, task_id)?;
            let mut stmt = conn.prepare(
                "SELECT d.* FROM task_dependencies d
                 JOIN live_tasks s ON s.id = d.task_id
                 WHERE d.predecessor_id = ?1
                 ORDER BY d.created_at, d.task_id",
            )?;
            let edges = stmt
                .query_map(params![task_id], parse_edge_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(edges)
        })
    }
}
