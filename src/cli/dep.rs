//! `taskava dep` subcommands.

use crate::context::TenantContext;
use crate::db::Database;
use crate::types::DependencyType;
use anyhow::Result;
use clap::Subcommand;
use serde_json::{Value, json};

#[derive(Subcommand, Debug)]
pub enum DepCommand {
    /// Make PREDECESSOR a predecessor of TASK
    Add {
        task: String,
        predecessor: String,
        /// FINISH_TO_START (FS), FINISH_TO_FINISH (FF), START_TO_START (SS), START_TO_FINISH (SF)
        #[arg(long = "type", default_value = "FINISH_TO_START")]
        dep_type: DependencyType,
        /// Lag in days; negative values are lead time
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        lag: i32,
    },

    /// Remove an edge (no-op if absent)
    Remove { task: String, predecessor: String },

    /// Show a task's predecessors and successors
    List { task: String },
}

pub fn run(db: &Database, ctx: &TenantContext, cmd: DepCommand) -> Result<Value> {
    let out = match cmd {
        DepCommand::Add {
            task,
            predecessor,
            dep_type,
            lag,
        } => serde_json::to_value(db.add_dependency(ctx, &task, &predecessor, dep_type, lag)?)?,
        DepCommand::Remove { task, predecessor } => {
            db.remove_dependency(ctx, &task, &predecessor)?;
            json!({ "task_id": task, "predecessor_id": predecessor, "removed": true })
        }
        DepCommand::List { task } => json!({
            "dependencies": db.list_dependencies(ctx, &task)?,
            "dependents": db.list_dependents(ctx, &task)?,
        }),
    };
    Ok(out)
}
