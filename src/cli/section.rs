//! `taskava section` subcommands.

use crate::context::TenantContext;
use crate::db::Database;
use anyhow::Result;
use clap::Subcommand;
use serde_json::{Value, json};

#[derive(Subcommand, Debug)]
pub enum SectionCommand {
    /// Create a section, appended unless a position is given
    Create {
        /// Project id
        project: String,
        /// Section name (unique within the project, case-insensitive)
        name: String,
        /// Zero-based position to insert at
        #[arg(long)]
        position: Option<i64>,
    },

    /// Rename a section
    Rename {
        project: String,
        section: String,
        name: String,
    },

    /// Move a section to a new position
    Move {
        project: String,
        section: String,
        /// Zero-based target position (clamped)
        position: i64,
    },

    /// Delete a section; its tasks move to the unsectioned bucket
    Delete { project: String, section: String },

    /// List a project's sections in order
    List { project: String },
}

pub fn run(db: &Database, ctx: &TenantContext, cmd: SectionCommand) -> Result<Value> {
    let out = match cmd {
        SectionCommand::Create {
            project,
            name,
            position,
        } => serde_json::to_value(db.create_section(ctx, &project, &name, position)?)?,
        SectionCommand::Rename {
            project,
            section,
            name,
        } => serde_json::to_value(db.rename_section(ctx, &project, &section, &name)?)?,
        SectionCommand::Move {
            project,
            section,
            position,
        } => serde_json::to_value(db.reorder_section(ctx, &project, &section, position)?)?,
        SectionCommand::Delete { project, section } => {
            db.delete_section(ctx, &project, &section)?;
            json!({ "deleted": section })
        }
        SectionCommand::List { project } => serde_json::to_value(db.list_sections(ctx, &project)?)?,
    };
    Ok(out)
}
