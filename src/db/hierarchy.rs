//! Parent/subtask hierarchy.
//!
//! Traversals carry a visited set and stop at the configured depth, so a
//! malformed parent chain cannot loop forever.

use super::placements::project_targets;
use super::tasks::{
    add_followers_internal, add_tags_internal, custom_fields_internal, followers_internal,
    get_task_internal, insert_task_internal, parse_task_row, require_task, tags_internal,
    update_custom_fields_internal,
};
use super::{Database, now_ms};
use crate::context::{TenantContext, UserDirectory};
use crate::error::{EngineError, EngineResult};
use crate::types::{DuplicateTask, NewTask, SubtaskFields, Task, TaskTree};
use rusqlite::{Connection, params};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

fn children_internal(conn: &Connection, parent_id: &str) -> EngineResult<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM live_tasks WHERE parent_task_id = ?1 ORDER BY task_number",
    )?;
    let children = stmt
        .query_map(params![parent_id], parse_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(children)
}

/// Copy the descendants of `source_id` under `copy_id`, level by level.
///
/// Each copy keeps the title, description, priority and due date, starts in
/// `Todo`, and is placed wherever its new parent is. Returns the number of
/// tasks copied.
fn copy_subtasks_internal(
    conn: &Connection,
    ctx: &TenantContext,
    users: &dyn UserDirectory,
    source_id: &str,
    copy_id: &str,
    max_depth: u32,
    now: i64,
) -> EngineResult<usize> {
    let mut visited: HashSet<String> = HashSet::from([source_id.to_string()]);
    let mut frontier = vec![(source_id.to_string(), copy_id.to_string())];
    let mut depth = 0;
    let mut copied = 0;

    while !frontier.is_empty() {
        if depth >= max_depth {
            warn!(source_id, max_depth, "subtask copy stopped at depth cap");
            break;
        }
        let mut next = Vec::new();
        for (original_parent, copied_parent) in frontier {
            for child in children_internal(conn, &original_parent)? {
                if !visited.insert(child.id.clone()) {
                    continue;
                }
                let new = NewTask {
                    title: child.title.clone(),
                    description: child.description.clone(),
                    priority: Some(child.priority),
                    due_date: child.due_date,
                    parent_task_id: Some(copied_parent.clone()),
                    placements: project_targets(conn, &copied_parent)?,
                    ..NewTask::default()
                };
                let child_copy = insert_task_internal(conn, ctx, users, &new, now)?;
                next.push((child.id, child_copy));
                copied += 1;
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(copied)
}

fn build_tree(task: Task, children: &mut HashMap<String, Vec<Task>>) -> TaskTree {
    let kids = children.remove(&task.id).unwrap_or_default();
    TaskTree {
        children: kids
            .into_iter()
            .map(|child| build_tree(child, children))
            .collect(),
        task,
    }
}

impl Database {
    /// Create a subtask under `parent_id`.
    ///
    /// Without explicit placements the subtask lands in every project the
    /// parent is in, in that project's unsectioned bucket.
    pub fn create_subtask(
        &self,
        ctx: &TenantContext,
        parent_id: &str,
        fields: SubtaskFields,
    ) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, parent_id)?;

            let placements = match fields.placements {
                Some(placements) => placements,
                None => project_targets(tx, parent_id)?,
            };
            let new = NewTask {
                title: fields.title,
                description: fields.description,
                priority: fields.priority,
                assignee_id: fields.assignee_id,
                due_date: fields.due_date,
                parent_task_id: Some(parent_id.to_string()),
                placements,
                ..NewTask::default()
            };

            let task_id = insert_task_internal(tx, ctx, self.users(), &new, now)?;
            info!(task_id, parent_id, placements = new.placements.len(), "subtask created");
            require_task(tx, ctx, &task_id)
        })
    }

    /// Detach a subtask from its parent. Placements are left as they are.
    pub fn promote(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            let task = require_task(tx, ctx, task_id)?;
            let Some(parent_id) = task.parent_task_id else {
                warn!(task_id, "promote rejected: no parent");
                return Err(EngineError::not_a_subtask(task_id));
            };

            tx.execute(
                "UPDATE tasks SET parent_task_id = NULL, updated_by = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![ctx.user_id(), now, task_id],
            )?;

            info!(task_id, %parent_id, "subtask promoted");
            require_task(tx, ctx, task_id)
        })
    }

    /// Copy a task into `options.target`, appended to that bucket.
    ///
    /// The copy gets the next task number, starts in `Todo`, and carries the
    /// source's priority, dates, estimate and story points. Tags, followers,
    /// custom field values and subtasks are copied as the options ask.
    pub fn duplicate_task(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        options: DuplicateTask,
    ) -> EngineResult<Task> {
        let max_depth = self.graph_limits().max_hierarchy_depth;
        let now = now_ms();
        self.write_tx(|tx| {
            let source = require_task(tx, ctx, task_id)?;

            let new = NewTask {
                title: options
                    .new_title
                    .clone()
                    .unwrap_or_else(|| format!("{} (Copy)", source.title)),
                description: source.description.clone(),
                priority: Some(source.priority),
                assignee_id: options.assignee_id.clone().or(source.assignee_id.clone()),
                start_date: source.start_date,
                due_date: source.due_date,
                estimated_hours: source.estimated_hours,
                story_points: source.story_points,
                placements: vec![options.target.clone()],
                ..NewTask::default()
            };
            let copy_id = insert_task_internal(tx, ctx, self.users(), &new, now)?;

            if options.include_tags {
                let tags = tags_internal(tx, task_id)?;
                add_tags_internal(tx, ctx, &copy_id, &tags, now)?;
            }
            if options.include_followers {
                let followers = followers_internal(tx, task_id)?;
                add_followers_internal(tx, ctx, &copy_id, &followers, now)?;
            }
            if options.include_custom_fields {
                let values = custom_fields_internal(tx, task_id)?;
                update_custom_fields_internal(tx, ctx, &copy_id, &values, now)?;
            }
            let subtasks = if options.include_subtasks {
                copy_subtasks_internal(
                    tx,
                    ctx,
                    self.users(),
                    task_id,
                    &copy_id,
                    max_depth,
                    now,
                )?
            } else {
                0
            };

            info!(task_id, copy_id, subtasks, "task duplicated");
            require_task(tx, ctx, &copy_id)
        })
    }

    /// Direct children of a task, by task number.
    pub fn list_subtasks(&self, ctx: &TenantContext, parent_id: &str) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, parent_id)?;
            children_internal(conn, parent_id)
        })
    }

    /// A task with all of its live descendants, gathered breadth-first.
    pub fn subtree(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<TaskTree> {
        let max_depth = self.graph_limits().max_hierarchy_depth;
        self.with_conn(|conn| {
            let root = require_task(conn, ctx, task_id)?;

            let mut visited: HashSet<String> = HashSet::from([root.id.clone()]);
            let mut children: HashMap<String, Vec<Task>> = HashMap::new();
            let mut frontier = vec![root.id.clone()];
            let mut depth = 0;

            while !frontier.is_empty() {
                if depth >= max_depth {
                    warn!(task_id, max_depth, "subtree truncated at depth cap");
                    break;
                }
                let mut next = Vec::new();
                for id in frontier {
                    let kids: Vec<Task> = children_internal(conn, &id)?
                        .into_iter()
                        .filter(|kid| visited.insert(kid.id.clone()))
                        .collect();
                    next.extend(kids.iter().map(|kid| kid.id.clone()));
                    children.insert(id, kids);
                }
                frontier = next;
                depth += 1;
            }

            Ok(build_tree(root, &mut children))
        })
    }

    /// Parent chain of a task, nearest first.
    pub fn ancestors(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Vec<Task>> {
        let max_depth = self.graph_limits().max_hierarchy_depth as usize;
        self.with_conn(|conn| {
            let task = require_task(conn, ctx, task_id)?;

            let mut visited: HashSet<String> = HashSet::from([task.id.clone()]);
            let mut chain = Vec::new();
            let mut next = task.parent_task_id;

            while let Some(parent_id) = next {
                if !visited.insert(parent_id.clone()) {
                    warn!(task_id, %parent_id, "parent chain loops");
                    break;
                }
                if chain.len() >= max_depth {
                    warn!(task_id, max_depth, "ancestor walk stopped at depth cap");
                    break;
                }
                let Some(parent) = get_task_internal(conn, &parent_id)? else {
                    break;
                };
                next = parent.parent_task_id.clone();
                chain.push(parent);
            }

            Ok(chain)
        })
    }
}
