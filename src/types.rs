//! Core types for the task placement engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task workflow status.
///
/// Any status may move to any other. Only `Completed` carries a side effect:
/// entering it stamps `completed_at`, leaving it clears the stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::InReview => "IN_REVIEW",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| UnknownVariant::new("status", s))
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "CRITICAL" => Ok(Priority::Critical),
            _ => Err(UnknownVariant::new("priority", s)),
        }
    }
}

/// Scheduling relationship carried by a dependency edge.
///
/// Informational only: the engine never derives dates from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    #[default]
    FinishToStart,
    FinishToFinish,
    StartToStart,
    StartToFinish,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::FinishToStart => "FINISH_TO_START",
            DependencyType::FinishToFinish => "FINISH_TO_FINISH",
            DependencyType::StartToStart => "START_TO_START",
            DependencyType::StartToFinish => "START_TO_FINISH",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FINISH_TO_START" | "FS" => Ok(DependencyType::FinishToStart),
            "FINISH_TO_FINISH" | "FF" => Ok(DependencyType::FinishToFinish),
            "START_TO_START" | "SS" => Ok(DependencyType::StartToStart),
            "START_TO_FINISH" | "SF" => Ok(DependencyType::StartToFinish),
            _ => Err(UnknownVariant::new("dependency type", s)),
        }
    }
}

/// Parse failure for one of the closed string enumerations above.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// How often a recurring task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Recurrence descriptor, stored as JSON on the task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_occurrences: Option<u32>,
}

fn default_interval() -> u32 {
    1
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    /// Per-workspace, monotonically increasing, user-visible number.
    pub task_number: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<String>,
    pub parent_task_id: Option<String>,

    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<i64>,

    // Estimation & tracking
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub progress_percentage: i32,
    pub story_points: Option<i32>,

    pub recurrence: Option<Recurrence>,

    pub is_archived: bool,
    pub archived_at: Option<i64>,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,

    pub created_by: String,
    pub created_at: i64,
    pub updated_by: String,
    pub updated_at: i64,
}

/// A project: the container tasks are placed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An ordered bucket inside one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One task homed in one project, optionally inside a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub task_id: String,
    pub project_id: String,
    pub section_id: Option<String>,
    /// Dense, zero-based position within the (project, section) bucket.
    pub position: i64,
    pub added_by: String,
    pub added_at: i64,
}

/// Where a task should be placed: a project and optionally a section of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementTarget {
    pub project_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
}

impl PlacementTarget {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            section_id: None,
        }
    }

    pub fn section(project_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            section_id: Some(section_id.into()),
        }
    }
}

/// A predecessor -> successor edge between two tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub predecessor_id: String,
    pub successor_id: String,
    pub dep_type: DependencyType,
    /// Negative values are lead time.
    pub lag_days: i32,
    pub created_by: String,
    pub created_at: i64,
}

/// A task with its descendants, for subtree queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTree>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub story_points: Option<i32>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub placements: Vec<PlacementTarget>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn in_project(mut self, target: PlacementTarget) -> Self {
        self.placements.push(target);
        self
    }
}

/// Input for creating a subtask.
///
/// When `placements` is `None` the subtask is homed in every project its
/// parent is homed in, in each project's unsectioned bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtaskFields {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub placements: Option<Vec<PlacementTarget>>,
}

impl SubtaskFields {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}

/// Options for copying a task into a project.
///
/// Without `new_title` the copy is titled `"<title> (Copy)"`. Without
/// `assignee_id` it keeps the source's assignee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateTask {
    #[serde(default)]
    pub new_title: Option<String>,
    pub target: PlacementTarget,
    #[serde(default)]
    pub include_subtasks: bool,
    #[serde(default = "default_true")]
    pub include_tags: bool,
    #[serde(default)]
    pub include_followers: bool,
    #[serde(default = "default_true")]
    pub include_custom_fields: bool,
    #[serde(default)]
    pub assignee_id: Option<String>,
}

impl DuplicateTask {
    pub fn into_target(target: PlacementTarget) -> Self {
        Self {
            new_title: None,
            target,
            include_subtasks: false,
            include_tags: true,
            include_followers: false,
            include_custom_fields: true,
            assignee_id: None,
        }
    }
}

/// Partial update of a task's content fields.
///
/// Outer `None` leaves the field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub start_date: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
    pub progress_percentage: Option<i32>,
    pub story_points: Option<Option<i32>>,
    pub recurrence: Option<Option<Recurrence>>,
}

/// Filters for listing tasks. Soft-deleted tasks are never returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    pub limit: Option<i64>,
}
