//! Task CRUD and the per-task attribute operations.

use super::lifecycle::{apply_status_internal, completion_stamp};
use super::placements::add_placement_internal;
use super::{Database, new_id, now_ms, parse_column};
use crate::context::{TenantContext, UserDirectory};
use crate::error::{EngineError, EngineResult};
use crate::types::{NewTask, Priority, Recurrence, Task, TaskFilter, TaskStatus, TaskUpdate};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let recurrence_json: Option<String> = row.get("recurrence")?;

    let recurrence = recurrence_json
        .map(|s| serde_json::from_str::<Recurrence>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Task {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        task_number: row.get("task_number")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: parse_column::<TaskStatus>(status)?,
        priority: parse_column::<Priority>(priority)?,
        assignee_id: row.get("assignee_id")?,
        parent_task_id: row.get("parent_task_id")?,
        start_date: row.get("start_date")?,
        due_date: row.get("due_date")?,
        completed_at: row.get("completed_at")?,
        estimated_hours: row.get("estimated_hours")?,
        actual_hours: row.get("actual_hours")?,
        progress_percentage: row.get("progress_percentage")?,
        story_points: row.get("story_points")?,
        recurrence,
        is_archived: row.get("is_archived")?,
        archived_at: row.get("archived_at")?,
        is_deleted: row.get("is_deleted")?,
        deleted_at: row.get("deleted_at")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_by: row.get("updated_by")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Look up a live task by id, in any workspace.
pub(crate) fn get_task_internal(conn: &Connection, task_id: &str) -> EngineResult<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM live_tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

/// Live task in the caller's workspace, or `NotFound`.
pub(crate) fn require_task(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
) -> EngineResult<Task> {
    match get_task_internal(conn, task_id)? {
        Some(task) if task.workspace_id == ctx.workspace_id() => Ok(task),
        _ => Err(EngineError::task_not_found(task_id)),
    }
}

pub(crate) fn require_user(
    users: &dyn UserDirectory,
    ctx: &TenantContext,
    user_id: &str,
) -> EngineResult<()> {
    if users.contains(ctx.workspace_id(), user_id) {
        Ok(())
    } else {
        Err(EngineError::user_not_found(user_id))
    }
}

/// Stamp the audit pair after a mutation that leaves content untouched.
pub(crate) fn touch_task_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET updated_by = ?1, updated_at = ?2 WHERE id = ?3",
        params![ctx.user_id(), now, task_id],
    )?;
    Ok(())
}

fn next_task_number(conn: &Connection, workspace_id: &str) -> EngineResult<i64> {
    let n = conn.query_row(
        "SELECT COALESCE(MAX(task_number), 0) + 1 FROM tasks WHERE workspace_id = ?1",
        params![workspace_id],
        |row| row.get(0),
    )?;
    Ok(n)
}

fn validate_title(title: &str) -> EngineResult<()> {
    if title.trim().is_empty() {
        return Err(EngineError::bad_request("Task title must not be empty"));
    }
    Ok(())
}

fn validate_progress(progress: i32) -> EngineResult<()> {
    if !(0..=100).contains(&progress) {
        return Err(EngineError::bad_request(format!(
            "Progress must be between 0 and 100, got {}",
            progress
        )));
    }
    Ok(())
}

/// Insert a task row plus its initial placements; returns the new id.
///
/// Every reference is validated before the row is written.
pub(crate) fn insert_task_internal(
    conn: &Connection,
    ctx: &TenantContext,
    users: &dyn UserDirectory,
    new: &NewTask,
    now: i64,
) -> EngineResult<String> {
    validate_title(&new.title)?;
    if let Some(parent_id) = &new.parent_task_id {
        require_task(conn, ctx, parent_id)?;
    }
    if let Some(assignee) = &new.assignee_id {
        require_user(users, ctx, assignee)?;
    }
    let task_id = new_id();
    let status = new.status.unwrap_or(TaskStatus::Todo);
    let recurrence = new
        .recurrence
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO tasks (
            id, workspace_id, task_number, title, description, status, priority,
            assignee_id, parent_task_id, start_date, due_date, completed_at,
            estimated_hours, story_points, recurrence,
            created_by, created_at, updated_by, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?16, ?17)",
        params![
            task_id,
            ctx.workspace_id(),
            next_task_number(conn, ctx.workspace_id())?,
            new.title.trim(),
            new.description,
            status.as_str(),
            new.priority.unwrap_or_default().as_str(),
            new.assignee_id,
            new.parent_task_id,
            new.start_date,
            new.due_date,
            completion_stamp(status, now),
            new.estimated_hours,
            new.story_points,
            recurrence,
            ctx.user_id(),
            now,
        ],
    )?;

    for target in &new.placements {
        add_placement_internal(conn, ctx, &task_id, target, None, now)?;
    }

    Ok(task_id)
}

pub(crate) fn set_priority_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    priority: Priority,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET priority = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
        params![priority.as_str(), ctx.user_id(), now, task_id],
    )?;
    Ok(())
}

pub(crate) fn assign_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    assignee_id: Option<&str>,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET assignee_id = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
        params![assignee_id, ctx.user_id(), now, task_id],
    )?;
    Ok(())
}

pub(crate) fn set_due_date_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    due_date: Option<NaiveDate>,
    now: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE tasks SET due_date = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
        params![due_date, ctx.user_id(), now, task_id],
    )?;
    Ok(())
}

/// Normalized, de-duplicated, non-empty tags.
pub(crate) fn normalize_tags(tags: &[String]) -> EngineResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(EngineError::bad_request("Tags must not be empty"));
        }
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    Ok(out)
}

pub(crate) fn add_tags_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    tags: &[String],
    now: i64,
) -> EngineResult<()> {
    for tag in tags {
        conn.execute(
            "INSERT OR IGNORE INTO task_tags (task_id, tag) VALUES (?1, ?2)",
            params![task_id, tag],
        )?;
    }
    touch_task_internal(conn, ctx, task_id, now)
}

pub(crate) fn remove_tags_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    tags: &[String],
    now: i64,
) -> EngineResult<()> {
    for tag in tags {
        conn.execute(
            "DELETE FROM task_tags WHERE task_id = ?1 AND tag = ?2",
            params![task_id, tag],
        )?;
    }
    touch_task_internal(conn, ctx, task_id, now)
}

pub(crate) fn add_followers_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    user_ids: &[String],
    now: i64,
) -> EngineResult<()> {
    for user_id in user_ids {
        conn.execute(
            "INSERT OR IGNORE INTO task_followers (task_id, user_id) VALUES (?1, ?2)",
            params![task_id, user_id],
        )?;
    }
    touch_task_internal(conn, ctx, task_id, now)
}

pub(crate) fn remove_followers_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    user_ids: &[String],
    now: i64,
) -> EngineResult<()> {
    for user_id in user_ids {
        conn.execute(
            "DELETE FROM task_followers WHERE task_id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )?;
    }
    touch_task_internal(conn, ctx, task_id, now)
}

/// Upsert custom field values; a JSON `null` removes the value.
pub(crate) fn update_custom_fields_internal(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: &str,
    values: &BTreeMap<String, JsonValue>,
    now: i64,
) -> EngineResult<()> {
    for (field_id, value) in values {
        if value.is_null() {
            conn.execute(
                "DELETE FROM task_custom_field_values WHERE task_id = ?1 AND field_id = ?2",
                params![task_id, field_id],
            )?;
        } else {
            conn.execute(
                "INSERT INTO task_custom_field_values (task_id, field_id, field_value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(task_id, field_id) DO UPDATE SET field_value = excluded.field_value",
                params![task_id, field_id, serde_json::to_string(value)?],
            )?;
        }
    }
    touch_task_internal(conn, ctx, task_id, now)
}

pub(crate) fn validate_custom_fields(values: &BTreeMap<String, JsonValue>) -> EngineResult<()> {
    if values.keys().any(|k| k.trim().is_empty()) {
        return Err(EngineError::bad_request("Custom field ids must not be empty"));
    }
    Ok(())
}

fn string_column(conn: &Connection, sql: &str, task_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params![task_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

pub(crate) fn tags_internal(conn: &Connection, task_id: &str) -> EngineResult<Vec<String>> {
    string_column(
        conn,
        "SELECT tag FROM task_tags WHERE task_id = ?1 ORDER BY tag",
        task_id,
    )
}

pub(crate) fn followers_internal(conn: &Connection, task_id: &str) -> EngineResult<Vec<String>> {
    string_column(
        conn,
        "SELECT user_id FROM task_followers WHERE task_id = ?1 ORDER BY user_id",
        task_id,
    )
}

pub(crate) fn custom_fields_internal(
    conn: &Connection,
    task_id: &str,
) -> EngineResult<BTreeMap<String, JsonValue>> {
    let mut stmt = conn.prepare(
        "SELECT field_id, field_value FROM task_custom_field_values WHERE task_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![task_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut values = BTreeMap::new();
    for (field_id, raw) in rows {
        values.insert(field_id, serde_json::from_str(&raw)?);
    }
    Ok(values)
}

impl Database {
    /// Create a task, assigning the next task number in the workspace.
    pub fn create_task(&self, ctx: &TenantContext, new: NewTask) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            let task_id = insert_task_internal(tx, ctx, self.users(), &new, now)?;
            let task = require_task(tx, ctx, &task_id)?;
            info!(
                task_id = %task.id,
                task_number = task.task_number,
                placements = new.placements.len(),
                "task created"
            );
            Ok(task)
        })
    }

    /// Get a live task by id.
    pub fn get_task(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Task> {
        self.with_conn(|conn| require_task(conn, ctx, task_id))
    }

    /// Apply a partial update to a task's content fields.
    ///
    /// A status change goes through the completion-stamp rule.
    pub fn update_task(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        update: TaskUpdate,
    ) -> EngineResult<Task> {
        if let Some(title) = &update.title {
            validate_title(title)?;
        }
        if let Some(progress) = update.progress_percentage {
            validate_progress(progress)?;
        }
        let recurrence = match &update.recurrence {
            Some(Some(r)) => Some(Some(serde_json::to_string(r)?)),
            Some(None) => Some(None),
            None => None,
        };

        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;

            let mut sets: Vec<&str> = Vec::new();
            let mut params: Vec<Value> = Vec::new();

            if let Some(title) = &update.title {
                sets.push("title = ?");
                params.push(Value::Text(title.trim().to_string()));
            }
            if let Some(description) = &update.description {
                sets.push("description = ?");
                params.push(description.clone().map_or(Value::Null, Value::Text));
            }
            if let Some(priority) = update.priority {
                sets.push("priority = ?");
                params.push(Value::Text(priority.as_str().to_string()));
            }
            if let Some(start) = update.start_date {
                sets.push("start_date = ?");
                params.push(start.map_or(Value::Null, |d| Value::Text(d.to_string())));
            }
            if let Some(due) = update.due_date {
                sets.push("due_date = ?");
                params.push(due.map_or(Value::Null, |d| Value::Text(d.to_string())));
            }
            if let Some(hours) = update.estimated_hours {
                sets.push("estimated_hours = ?");
                params.push(hours.map_or(Value::Null, Value::Real));
            }
            if let Some(hours) = update.actual_hours {
                sets.push("actual_hours = ?");
                params.push(hours.map_or(Value::Null, Value::Real));
            }
            if let Some(progress) = update.progress_percentage {
                sets.push("progress_percentage = ?");
                params.push(Value::Integer(progress.into()));
            }
            if let Some(points) = update.story_points {
                sets.push("story_points = ?");
                params.push(points.map_or(Value::Null, |p| Value::Integer(p.into())));
            }
            if let Some(recurrence) = &recurrence {
                sets.push("recurrence = ?");
                params.push(recurrence.clone().map_or(Value::Null, Value::Text));
            }

            sets.push("updated_by = ?");
            params.push(Value::Text(ctx.user_id().to_string()));
            sets.push("updated_at = ?");
            params.push(Value::Integer(now));
            params.push(Value::Text(task_id.to_string()));

            let sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));
            tx.execute(&sql, params_from_iter(params))?;

            if let Some(status) = update.status {
                apply_status_internal(tx, ctx, task_id, status, now)?;
            }

            info!(task_id, "task updated");
            require_task(tx, ctx, task_id)
        })
    }

    /// List live tasks in the caller's workspace, ordered by task number.
    pub fn list_tasks(&self, ctx: &TenantContext, filter: &TaskFilter) -> EngineResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT t.* FROM live_tasks t WHERE t.workspace_id = ?");
            let mut params: Vec<Value> = vec![Value::Text(ctx.workspace_id().to_string())];

            if !filter.include_archived {
                sql.push_str(" AND t.is_archived = 0");
            }
            if let Some(project_id) = &filter.project_id {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM task_projects tp
                                  WHERE tp.task_id = t.id AND tp.project_id = ?)",
                );
                params.push(Value::Text(project_id.clone()));
            }
            if let Some(status) = filter.status {
                sql.push_str(" AND t.status = ?");
                params.push(Value::Text(status.as_str().to_string()));
            }
            if let Some(priority) = filter.priority {
                sql.push_str(" AND t.priority = ?");
                params.push(Value::Text(priority.as_str().to_string()));
            }
            if let Some(assignee) = &filter.assignee_id {
                sql.push_str(" AND t.assignee_id = ?");
                params.push(Value::Text(assignee.clone()));
            }
            if let Some(parent) = &filter.parent_task_id {
                sql.push_str(" AND t.parent_task_id = ?");
                params.push(Value::Text(parent.clone()));
            }
            if let Some(search) = &filter.search {
                sql.push_str(
                    " AND (t.title LIKE ? ESCAPE '\\' OR COALESCE(t.description, '') LIKE ? ESCAPE '\\')",
                );
                let pattern = format!("%{}%", escape_like(search));
                params.push(Value::Text(pattern.clone()));
                params.push(Value::Text(pattern));
            }

            sql.push_str(" ORDER BY t.task_number");
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit.max(0)));
            }

            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_from_iter(params), parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            debug!(count = tasks.len(), "listed tasks");
            Ok(tasks)
        })
    }

    pub fn set_priority(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        priority: Priority,
    ) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            set_priority_internal(tx, ctx, task_id, priority, now)?;
            info!(task_id, %priority, "task priority changed");
            require_task(tx, ctx, task_id)
        })
    }

    /// Set or clear the assignee. The user must be known to the directory.
    pub fn assign(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        assignee_id: Option<&str>,
    ) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            if let Some(user_id) = assignee_id {
                require_user(self.users(), ctx, user_id)?;
            }
            assign_internal(tx, ctx, task_id, assignee_id, now)?;
            info!(task_id, ?assignee_id, "task assigned");
            require_task(tx, ctx, task_id)
        })
    }

    pub fn set_due_date(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        due_date: Option<NaiveDate>,
    ) -> EngineResult<Task> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            set_due_date_internal(tx, ctx, task_id, due_date, now)?;
            info!(task_id, ?due_date, "task due date changed");
            require_task(tx, ctx, task_id)
        })
    }

    pub fn add_tags(&self, ctx: &TenantContext, task_id: &str, tags: &[String]) -> EngineResult<()> {
        let tags = normalize_tags(tags)?;
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            add_tags_internal(tx, ctx, task_id, &tags, now)?;
            info!(task_id, ?tags, "tags added");
            Ok(())
        })
    }

    pub fn remove_tags(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        tags: &[String],
    ) -> EngineResult<()> {
        let tags = normalize_tags(tags)?;
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            remove_tags_internal(tx, ctx, task_id, &tags, now)?;
            info!(task_id, ?tags, "tags removed");
            Ok(())
        })
    }

    /// Tags on a task, sorted.
    pub fn task_tags(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Vec<String>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, task_id)?;
            tags_internal(conn, task_id)
        })
    }

    pub fn add_followers(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        user_ids: &[String],
    ) -> EngineResult<()> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            for user_id in user_ids {
                require_user(self.users(), ctx, user_id)?;
            }
            add_followers_internal(tx, ctx, task_id, user_ids, now)?;
            info!(task_id, followers = user_ids.len(), "followers added");
            Ok(())
        })
    }

    pub fn remove_followers(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        user_ids: &[String],
    ) -> EngineResult<()> {
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            remove_followers_internal(tx, ctx, task_id, user_ids, now)?;
            info!(task_id, followers = user_ids.len(), "followers removed");
            Ok(())
        })
    }

    /// Followers of a task, sorted.
    pub fn task_followers(&self, ctx: &TenantContext, task_id: &str) -> EngineResult<Vec<String>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, task_id)?;
            followers_internal(conn, task_id)
        })
    }

    pub fn update_custom_fields(
        &self,
        ctx: &TenantContext,
        task_id: &str,
        values: &BTreeMap<String, JsonValue>,
    ) -> EngineResult<()> {
        validate_custom_fields(values)?;
        let now = now_ms();
        self.write_tx(|tx| {
            require_task(tx, ctx, task_id)?;
            update_custom_fields_internal(tx, ctx, task_id, values, now)?;
            info!(task_id, fields = values.len(), "custom fields updated");
            Ok(())
        })
    }

    pub fn custom_field_values(
        &self,
        ctx: &TenantContext,
        task_id: &str,
    ) -> EngineResult<BTreeMap<String, JsonValue>> {
        self.with_conn(|conn| {
            require_task(conn, ctx, task_id)?;
            custom_fields_internal(conn, task_id)
        })
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = normalize_tags(&[" a".into(), "b".into(), "a ".into()]).unwrap();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(normalize_tags(&["  ".into()]).unwrap_err().is_bad_request());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }
}
