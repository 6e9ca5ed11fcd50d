//! CLI command definitions for taskava.
//!
//! The `Cli` struct carries the global options; each subcommand group lives
//! in its own module with a `run` function that returns JSON.

pub mod bulk;
pub mod dep;
pub mod place;
pub mod project;
pub mod section;
pub mod task;

use crate::context::TenantContext;
use crate::db::Database;
use anyhow::Result;
use bulk::BulkArgs;
use clap::{Parser, Subcommand};
use dep::DepCommand;
use place::PlaceCommand;
use project::ProjectCommand;
use section::SectionCommand;
use serde_json::Value;
use task::TaskCommand;

/// Taskava task placement and dependency engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Workspace the command acts in
    #[arg(short, long, env = "TASKAVA_WORKSPACE", default_value = "default", global = true)]
    pub workspace: String,

    /// Acting user, recorded in audit fields
    #[arg(short, long, env = "TASKAVA_USER", default_value = "cli", global = true)]
    pub user: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, list and delete projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage the ordered sections of a project
    #[command(subcommand)]
    Section(SectionCommand),

    /// Create, inspect and change tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Place tasks into projects and sections
    #[command(subcommand)]
    Place(PlaceCommand),

    /// Manage dependency edges
    #[command(subcommand)]
    Dep(DepCommand),

    /// Apply a bulk operation from a JSON request
    Bulk(BulkArgs),
}

impl Cli {
    pub fn tenant(&self) -> crate::error::EngineResult<TenantContext> {
        TenantContext::new(&self.workspace, &self.user)
    }
}

/// Dispatch a parsed command and return its JSON output.
pub fn run(db: &Database, ctx: &TenantContext, command: Command) -> Result<Value> {
    match command {
        Command::Project(cmd) => project::run(db, ctx, cmd),
        Command::Section(cmd) => section::run(db, ctx, cmd),
        Command::Task(cmd) => task::run(db, ctx, cmd),
        Command::Place(cmd) => place::run(db, ctx, cmd),
        Command::Dep(cmd) => dep::run(db, ctx, cmd),
        Command::Bulk(args) => bulk::run(db, ctx, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_identity() {
        let cli = Cli::try_parse_from([
            "taskava", "--workspace", "w1", "--user", "u1", "project", "list",
        ])
        .unwrap();
        let ctx = cli.tenant().unwrap();
        assert_eq!(ctx.workspace_id(), "w1");
        assert_eq!(ctx.user_id(), "u1");
        assert!(matches!(cli.command, Command::Project(ProjectCommand::List)));
    }

    #[test]
    fn parses_placement_flags() {
        let cli = Cli::try_parse_from([
            "taskava", "place", "move", "t1", "p1", "--section", "s1", "--position", "0",
        ])
        .unwrap();
        match cli.command {
            Command::Place(PlaceCommand::Move {
                section, position, ..
            }) => {
                assert_eq!(section.as_deref(), Some("s1"));
                assert_eq!(position, Some(0));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_duplicate_flags() {
        let cli = Cli::try_parse_from([
            "taskava", "task", "duplicate", "t1", "--in", "p1:s1", "--subtasks", "--no-tags",
        ])
        .unwrap();
        match cli.command {
            Command::Task(TaskCommand::Duplicate {
                target,
                subtasks,
                no_tags,
                followers,
                ..
            }) => {
                assert_eq!(target, "p1:s1");
                assert!(subtasks);
                assert!(no_tags);
                assert!(!followers);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
