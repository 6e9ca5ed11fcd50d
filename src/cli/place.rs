//! `taskava place` subcommands.

use crate::context::TenantContext;
use crate::db::Database;
use crate::types::PlacementTarget;
use anyhow::Result;
use clap::Subcommand;
use serde_json::{Value, json};

#[derive(Subcommand, Debug)]
pub enum PlaceCommand {
    /// Add a task to a project
    Add {
        task: String,
        project: String,
        #[arg(long)]
        section: Option<String>,
        /// Zero-based position to insert at (appends when omitted)
        #[arg(long)]
        position: Option<i64>,
    },

    /// Remove a task from one project
    Remove { task: String, project: String },

    /// Move a task to another section or position within a project
    Move {
        task: String,
        project: String,
        /// Target section (the unsectioned bucket when omitted)
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        position: Option<i64>,
    },

    /// List the tasks in one bucket, in order
    List {
        project: String,
        #[arg(long)]
        section: Option<String>,
    },
}

pub fn run(db: &Database, ctx: &TenantContext, cmd: PlaceCommand) -> Result<Value> {
    let out = match cmd {
        PlaceCommand::Add {
            task,
            project,
            section,
            position,
        } => {
            let target = PlacementTarget {
                project_id: project,
                section_id: section,
            };
            serde_json::to_value(db.add_to_project(ctx, &task, &target, position)?)?
        }
        PlaceCommand::Remove { task, project } => {
            db.remove_from_project(ctx, &task, &project)?;
            json!({ "task_id": task, "removed_from": project })
        }
        PlaceCommand::Move {
            task,
            project,
            section,
            position,
        } => serde_json::to_value(db.move_to_section(
            ctx,
            &task,
            &project,
            section.as_deref(),
            position,
        )?)?,
        PlaceCommand::List { project, section } => {
            let placements = db.bucket_placements(ctx, &project, section.as_deref())?;
            let tasks = db.project_tasks(ctx, &project, section.as_deref())?;
            let rows: Vec<Value> = placements
                .iter()
                .zip(tasks.iter())
                .map(|(p, t)| {
                    json!({
                        "position": p.position,
                        "task_id": t.id,
                        "task_number": t.task_number,
                        "title": t.title,
                        "status": t.status,
                    })
                })
                .collect();
            Value::Array(rows)
        }
    };
    Ok(out)
}
