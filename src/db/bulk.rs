//! Bulk operations over many tasks in one transaction.
//!
//! The dispatcher loads every requested task once, validates the operation
//! against all of them, then applies it through the same helpers the
//! single-task operations use. Missing ids are reported, not errors.

use super::lifecycle::{apply_status_internal, archive_internal, soft_delete_internal};
use super::placements::{
    add_placement_internal, get_placement_internal, move_to_project_internal,
    move_to_section_internal, remove_placement_internal, require_placement, validate_target,
};
use super::projects::require_project;
use super::sections::require_section;
use super::tasks::{
    add_followers_internal, add_tags_internal, assign_internal, normalize_tags, parse_task_row,
    remove_followers_internal, remove_tags_internal, require_user, set_due_date_internal,
    set_priority_internal, update_custom_fields_internal, validate_custom_fields,
};
use super::{Database, now_ms};
use crate::context::TenantContext;
use crate::error::{EngineError, EngineResult};
use crate::types::{PlacementTarget, Priority, Task, TaskStatus};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// The closed set of bulk operations and their payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkOperation {
    UpdateStatus {
        status: TaskStatus,
    },
    UpdatePriority {
        priority: Priority,
    },
    /// `None` unassigns.
    UpdateAssignee {
        #[serde(default)]
        assignee_id: Option<String>,
    },
    /// `None` clears the due date.
    UpdateDueDate {
        #[serde(default)]
        due_date: Option<NaiveDate>,
    },
    AddTags {
        tags: Vec<String>,
    },
    RemoveTags {
        tags: Vec<String>,
    },
    MoveToProject {
        project_id: String,
        #[serde(default)]
        section_id: Option<String>,
    },
    MoveToSection {
        project_id: String,
        #[serde(default)]
        section_id: Option<String>,
        #[serde(default)]
        position: Option<i64>,
    },
    UpdateCustomFields {
        custom_field_values: BTreeMap<String, JsonValue>,
    },
    AddFollowers {
        user_ids: Vec<String>,
    },
    RemoveFollowers {
        user_ids: Vec<String>,
    },
    AddToProjects {
        project_ids: Vec<String>,
    },
    RemoveFromProjects {
        project_ids: Vec<String>,
    },
    Complete,
    Delete,
    Archive,
}

impl BulkOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BulkOperation::UpdateStatus { .. } => "UPDATE_STATUS",
            BulkOperation::UpdatePriority { .. } => "UPDATE_PRIORITY",
            BulkOperation::UpdateAssignee { .. } => "UPDATE_ASSIGNEE",
            BulkOperation::UpdateDueDate { .. } => "UPDATE_DUE_DATE",
            BulkOperation::AddTags { .. } => "ADD_TAGS",
            BulkOperation::RemoveTags { .. } => "REMOVE_TAGS",
            BulkOperation::MoveToProject { .. } => "MOVE_TO_PROJECT",
            BulkOperation::MoveToSection { .. } => "MOVE_TO_SECTION",
            BulkOperation::UpdateCustomFields { .. } => "UPDATE_CUSTOM_FIELDS",
            BulkOperation::AddFollowers { .. } => "ADD_FOLLOWERS",
            BulkOperation::RemoveFollowers { .. } => "REMOVE_FOLLOWERS",
            BulkOperation::AddToProjects { .. } => "ADD_TO_PROJECTS",
            BulkOperation::RemoveFromProjects { .. } => "REMOVE_FROM_PROJECTS",
            BulkOperation::Complete => "COMPLETE",
            BulkOperation::Delete => "DELETE",
            BulkOperation::Archive => "ARCHIVE",
        }
    }
}

/// A set of task ids plus one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub task_ids: Vec<String>,
    #[serde(flatten)]
    pub operation: BulkOperation,
}

impl BulkRequest {
    pub fn new(task_ids: Vec<String>, operation: BulkOperation) -> Self {
        Self {
            task_ids,
            operation,
        }
    }

    /// Parse a request. An unknown operation or malformed payload is a
    /// `BadRequest`.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            EngineError::bad_request(format!("Invalid bulk request: {}", e)).with_source(e)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkOutcome {
    Applied,
    /// The id does not name a live task in this workspace.
    SkippedNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub task_id: String,
    pub outcome: BulkOutcome,
}

/// Requested ids with duplicates dropped, first occurrence kept.
fn dedupe(ids: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Load every live task named in `ids` from the caller's workspace, in one query.
fn load_tasks(
    conn: &Connection,
    ctx: &TenantContext,
    ids: &[&str],
) -> EngineResult<HashMap<String, Task>> {
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT * FROM live_tasks WHERE workspace_id = ? AND id IN ({})",
        placeholders
    );
    let mut params = vec![Value::Text(ctx.workspace_id().to_string())];
    params.extend(ids.iter().map(|id| Value::Text(id.to_string())));

    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params_from_iter(params), parse_task_row)?
        .map(|r| r.map(|task| (task.id.clone(), task)))
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(tasks)
}

impl Database {
    /// Apply one operation to many tasks atomically.
    ///
    /// Returns one result per distinct requested id, in request order.
    /// Business-rule failures are detected for every member before the first
    /// write; a storage failure rolls the whole batch back.
    pub fn apply_bulk(
        &self,
        ctx: &TenantContext,
        request: &BulkRequest,
    ) -> EngineResult<Vec<BulkItemResult>> {
        if request.task_ids.is_empty() {
            return Err(EngineError::bad_request("Task IDs are required"));
        }
        let ids = dedupe(&request.task_ids);
        let op = &request.operation;
        let now = now_ms();

        self.write_tx(|tx| {
            let tasks = load_tasks(tx, ctx, &ids)?;
            let members: Vec<&str> = ids
                .iter()
                .copied()
                .filter(|id| tasks.contains_key(*id))
                .collect();
            debug!(
                operation = op.name(),
                requested = ids.len(),
                found = members.len(),
                "bulk tasks loaded"
            );

            let plan = self.validate_bulk(tx, ctx, op, &members)?;
            for task_id in &members {
                apply_one(tx, ctx, op, &plan, task_id, now)?;
            }

            let skipped = ids.len() - members.len();
            if skipped > 0 {
                warn!(operation = op.name(), skipped, "bulk skipped missing tasks");
            }
            info!(
                operation = op.name(),
                applied = members.len(),
                skipped,
                "bulk operation applied"
            );

            Ok(ids
                .iter()
                .map(|id| BulkItemResult {
                    task_id: id.to_string(),
                    outcome: if tasks.contains_key(*id) {
                        BulkOutcome::Applied
                    } else {
                        BulkOutcome::SkippedNotFound
                    },
                })
                .collect())
        })
    }

    /// Check the operation against every member; nothing is written here.
    fn validate_bulk(
        &self,
        conn: &Connection,
        ctx: &TenantContext,
        op: &BulkOperation,
        members: &[&str],
    ) -> EngineResult<Plan> {
        let mut plan = Plan::default();
        match op {
            BulkOperation::UpdateAssignee {
                assignee_id: Some(user_id),
            } => require_user(self.users(), ctx, user_id)?,
            BulkOperation::AddTags { tags } | BulkOperation::RemoveTags { tags } => {
                plan.tags = normalize_tags(tags)?;
            }
            BulkOperation::MoveToProject {
                project_id,
                section_id,
            } => validate_target(
                conn,
                ctx,
                &PlacementTarget {
                    project_id: project_id.clone(),
                    section_id: section_id.clone(),
                },
            )?,
            BulkOperation::MoveToSection {
                project_id,
                section_id,
                ..
            } => {
                require_project(conn, ctx, project_id)?;
                if let Some(section_id) = section_id {
                    require_section(conn, project_id, section_id)?;
                }
                for task_id in members {
                    require_placement(conn, task_id, project_id)?;
                }
            }
            BulkOperation::UpdateCustomFields {
                custom_field_values,
            } => validate_custom_fields(custom_field_values)?,
            BulkOperation::AddFollowers { user_ids } => {
                for user_id in user_ids {
                    require_user(self.users(), ctx, user_id)?;
                }
            }
            BulkOperation::AddToProjects { project_ids } => {
                plan.project_ids = dedupe(project_ids).into_iter().map(str::to_string).collect();
                for project_id in &plan.project_ids {
                    require_project(conn, ctx, project_id)?;
                    for task_id in members {
                        if get_placement_internal(conn, task_id, project_id)?.is_some() {
                            warn!(task_id, project_id, "bulk add rejected: already placed");
                            return Err(EngineError::duplicate_placement(task_id, project_id));
                        }
                    }
                }
            }
            BulkOperation::RemoveFromProjects { project_ids } => {
                plan.project_ids = dedupe(project_ids).into_iter().map(str::to_string).collect();
                for project_id in &plan.project_ids {
                    require_project(conn, ctx, project_id)?;
                }
            }
            BulkOperation::UpdateStatus { .. }
            | BulkOperation::UpdatePriority { .. }
            | BulkOperation::UpdateAssignee { assignee_id: None }
            | BulkOperation::UpdateDueDate { .. }
            | BulkOperation::RemoveFollowers { .. }
            | BulkOperation::Complete
            | BulkOperation::Delete
            | BulkOperation::Archive => {}
        }
        Ok(plan)
    }
}

/// Normalized payload pieces computed once during validation.
#[derive(Debug, Default)]
struct Plan {
    tags: Vec<String>,
    project_ids: Vec<String>,
}

fn apply_one(
    conn: &Connection,
    ctx: &TenantContext,
    op: &BulkOperation,
    plan: &Plan,
    task_id: &str,
    now: i64,
) -> EngineResult<()> {
    match op {
        BulkOperation::UpdateStatus { status } => {
            apply_status_internal(conn, ctx, task_id, *status, now)
        }
        BulkOperation::UpdatePriority { priority } => {
            set_priority_internal(conn, ctx, task_id, *priority, now)
        }
        BulkOperation::UpdateAssignee { assignee_id } => {
            assign_internal(conn, ctx, task_id, assignee_id.as_deref(), now)
        }
        BulkOperation::UpdateDueDate { due_date } => {
            set_due_date_internal(conn, ctx, task_id, *due_date, now)
        }
        BulkOperation::AddTags { .. } => add_tags_internal(conn, ctx, task_id, &plan.tags, now),
        BulkOperation::RemoveTags { .. } => {
            remove_tags_internal(conn, ctx, task_id, &plan.tags, now)
        }
        BulkOperation::MoveToProject {
            project_id,
            section_id,
        } => {
            let target = PlacementTarget {
                project_id: project_id.clone(),
                section_id: section_id.clone(),
            };
            move_to_project_internal(conn, ctx, task_id, &target, now).map(|_| ())
        }
        BulkOperation::MoveToSection {
            project_id,
            section_id,
            position,
        } => move_to_section_internal(
            conn,
            ctx,
            task_id,
            project_id,
            section_id.as_deref(),
            *position,
            now,
        )
        .map(|_| ()),
        BulkOperation::UpdateCustomFields {
            custom_field_values,
        } => update_custom_fields_internal(conn, ctx, task_id, custom_field_values, now),
        BulkOperation::AddFollowers { user_ids } => {
            add_followers_internal(conn, ctx, task_id, user_ids, now)
        }
        BulkOperation::RemoveFollowers { user_ids } => {
            remove_followers_internal(conn, ctx, task_id, user_ids, now)
        }
        BulkOperation::AddToProjects { .. } => {
            for project_id in &plan.project_ids {
                let target = PlacementTarget::project(project_id.as_str());
                add_placement_internal(conn, ctx, task_id, &target, None, now)?;
            }
            Ok(())
        }
        BulkOperation::RemoveFromProjects { .. } => {
            for project_id in &plan.project_ids {
                if get_placement_internal(conn, task_id, project_id)?.is_some() {
                    remove_placement_internal(conn, ctx, task_id, project_id, now)?;
                }
            }
            Ok(())
        }
        BulkOperation::Complete => {
            apply_status_internal(conn, ctx, task_id, TaskStatus::Completed, now)
        }
        BulkOperation::Delete => soft_delete_internal(conn, ctx, task_id, now),
        BulkOperation::Archive => archive_internal(conn, ctx, task_id, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_request() {
        let req = BulkRequest::from_json(
            r#"{"task_ids":["a","b"],"operation":"UPDATE_STATUS","status":"IN_REVIEW"}"#,
        )
        .unwrap();
        assert_eq!(req.task_ids, vec!["a", "b"]);
        assert_eq!(
            req.operation,
            BulkOperation::UpdateStatus {
                status: TaskStatus::InReview
            }
        );
    }

    #[test]
    fn unit_operations_need_no_payload() {
        let req = BulkRequest::from_json(r#"{"task_ids":["a"],"operation":"ARCHIVE"}"#).unwrap();
        assert_eq!(req.operation, BulkOperation::Archive);
        assert_eq!(req.operation.name(), "ARCHIVE");
    }

    #[test]
    fn unknown_operation_is_bad_request() {
        let err = BulkRequest::from_json(r#"{"task_ids":["a"],"operation":"TELEPORT"}"#)
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn missing_payload_is_bad_request() {
        let err = BulkRequest::from_json(r#"{"task_ids":["a"],"operation":"ADD_TAGS"}"#)
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let ids = vec!["b".to_string(), "a".into(), "b".into(), "c".into(), "a".into()];
        assert_eq!(dedupe(&ids), vec!["b", "a", "c"]);
    }
}
