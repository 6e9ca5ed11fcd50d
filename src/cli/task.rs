//! `taskava task` subcommands.

use crate::context::TenantContext;
use crate::db::Database;
use crate::types::{
    DuplicateTask, NewTask, PlacementTarget, Priority, SubtaskFields, TaskFilter, TaskStatus,
};
use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::Subcommand;
use serde_json::{Value, json};

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        assignee: Option<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Place into PROJECT or PROJECT:SECTION (repeatable)
        #[arg(long = "in", value_name = "PROJECT[:SECTION]")]
        placements: Vec<String>,
    },

    /// Show a task with its placements, tags, edges and subtasks
    Show { id: String },

    /// List tasks in the workspace
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        assignee: Option<String>,
        /// Substring match on title or description
        #[arg(long)]
        search: Option<String>,
        /// Include archived tasks
        #[arg(long)]
        archived: bool,
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Change a task's status
    Status { id: String, status: TaskStatus },

    /// Soft-delete a task
    Delete { id: String },

    /// Create a subtask (placed wherever the parent is, unless --in is given)
    Subtask {
        parent: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long = "in", value_name = "PROJECT[:SECTION]")]
        placements: Vec<String>,
    },

    /// Detach a subtask from its parent
    Promote { id: String },

    /// List a task's direct subtasks
    Subtasks { id: String },

    /// Show a task's full subtree
    Tree { id: String },

    /// Copy a task into a project (appended to the target bucket)
    Duplicate {
        id: String,
        #[arg(long = "in", value_name = "PROJECT[:SECTION]")]
        target: String,
        /// Title for the copy (default: "<title> (Copy)")
        #[arg(long)]
        title: Option<String>,
        /// Assignee for the copy (default: the source's assignee)
        #[arg(long)]
        assignee: Option<String>,
        /// Also copy the subtask tree
        #[arg(long)]
        subtasks: bool,
        #[arg(long)]
        followers: bool,
        #[arg(long)]
        no_tags: bool,
        #[arg(long)]
        no_custom_fields: bool,
    },
}

/// Parse `PROJECT` or `PROJECT:SECTION`.
fn parse_target(raw: &str) -> Result<PlacementTarget> {
    match raw.split_once(':') {
        None if !raw.is_empty() => Ok(PlacementTarget::project(raw)),
        Some((project, section)) if !project.is_empty() && !section.is_empty() => {
            Ok(PlacementTarget::section(project, section))
        }
        _ => bail!("invalid placement '{}', expected PROJECT or PROJECT:SECTION", raw),
    }
}

fn parse_targets(raw: &[String]) -> Result<Vec<PlacementTarget>> {
    raw.iter().map(|s| parse_target(s)).collect()
}

pub fn run(db: &Database, ctx: &TenantContext, cmd: TaskCommand) -> Result<Value> {
    let out = match cmd {
        TaskCommand::Create {
            title,
            description,
            priority,
            assignee,
            due,
            placements,
        } => {
            let new = NewTask {
                description,
                priority,
                assignee_id: assignee,
                due_date: due,
                placements: parse_targets(&placements)?,
                ..NewTask::titled(title)
            };
            serde_json::to_value(db.create_task(ctx, new)?)?
        }
        TaskCommand::Show { id } => json!({
            "task": db.get_task(ctx, &id)?,
            "placements": db.placements_for_task(ctx, &id)?,
            "tags": db.task_tags(ctx, &id)?,
            "followers": db.task_followers(ctx, &id)?,
            "custom_fields": db.custom_field_values(ctx, &id)?,
            "dependencies": db.list_dependencies(ctx, &id)?,
            "dependents": db.list_dependents(ctx, &id)?,
            "subtasks": db.list_subtasks(ctx, &id)?,
        }),
        TaskCommand::List {
            project,
            status,
            assignee,
            search,
            archived,
            limit,
        } => {
            let filter = TaskFilter {
                project_id: project,
                status,
                assignee_id: assignee,
                search,
                include_archived: archived,
                limit,
                ..TaskFilter::default()
            };
            serde_json::to_value(db.list_tasks(ctx, &filter)?)?
        }
        TaskCommand::Status { id, status } => serde_json::to_value(db.set_status(ctx, &id, status)?)?,
        TaskCommand::Delete { id } => {
            db.soft_delete(ctx, &id)?;
            json!({ "deleted": id })
        }
        TaskCommand::Subtask {
            parent,
            title,
            description,
            priority,
            placements,
        } => {
            let fields = SubtaskFields {
                description,
                priority,
                placements: if placements.is_empty() {
                    None
                } else {
                    Some(parse_targets(&placements)?)
                },
                ..SubtaskFields::titled(title)
            };
            serde_json::to_value(db.create_subtask(ctx, &parent, fields)?)?
        }
        TaskCommand::Promote { id } => serde_json::to_value(db.promote(ctx, &id)?)?,
        TaskCommand::Subtasks { id } => serde_json::to_value(db.list_subtasks(ctx, &id)?)?,
        TaskCommand::Tree { id } => serde_json::to_value(db.subtree(ctx, &id)?)?,
        TaskCommand::Duplicate {
            id,
            target,
            title,
            assignee,
            subtasks,
            followers,
            no_tags,
            no_custom_fields,
        } => {
            let options = DuplicateTask {
                new_title: title,
                include_subtasks: subtasks,
                include_tags: !no_tags,
                include_followers: followers,
                include_custom_fields: !no_custom_fields,
                assignee_id: assignee,
                ..DuplicateTask::into_target(parse_target(&target)?)
            };
            serde_json::to_value(db.duplicate_task(ctx, &id, options)?)?
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_placement_targets() {
        assert_eq!(parse_target("p1").unwrap(), PlacementTarget::project("p1"));
        assert_eq!(
            parse_target("p1:s1").unwrap(),
            PlacementTarget::section("p1", "s1")
        );
        assert!(parse_target("p1:").is_err());
        assert!(parse_target("").is_err());
    }
}
