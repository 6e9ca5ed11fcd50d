//! `taskava project` subcommands.

use crate::context::TenantContext;
use crate::db::Database;
use anyhow::Result;
use clap::Subcommand;
use serde_json::{Value, json};

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project
    Create {
        /// Project name
        name: String,
    },

    /// List projects in the workspace
    List,

    /// Delete a project with its sections and placements
    Delete {
        /// Project id
        id: String,
    },
}

pub fn run(db: &Database, ctx: &TenantContext, cmd: ProjectCommand) -> Result<Value> {
    let out = match cmd {
        ProjectCommand::Create { name } => serde_json::to_value(db.create_project(ctx, &name)?)?,
        ProjectCommand::List => serde_json::to_value(db.list_projects(ctx)?)?,
        ProjectCommand::Delete { id } => {
            db.delete_project(ctx, &id)?;
            json!({ "deleted": id })
        }
    };
    Ok(out)
}
