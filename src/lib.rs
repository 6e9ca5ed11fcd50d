//! Taskava task placement and dependency engine.
//!
//! Tasks are multi-homed into projects and sections with dense positions,
//! linked by an acyclic dependency graph and a parent/subtask hierarchy, and
//! mutated singly or in bulk. Every call takes an explicit [`TenantContext`].

pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod types;

pub use context::{OpenDirectory, TenantContext, UserDirectory};
pub use db::Database;
pub use error::{EngineError, EngineResult, ErrorKind};
