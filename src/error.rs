//! Structured error types for engine operations.

use serde::Serialize;
use std::fmt;

/// Error kinds for programmatic error handling.
///
/// The request layer maps these to 404 / 400 / 409 / 500.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Referenced entity does not exist or is soft-deleted.
    NotFound,
    /// Structurally invalid input.
    BadRequest,
    /// Invariant violation (duplicate placement, dependency cycle, ...).
    Conflict,
    /// Transaction or storage failure; never interpreted by the engine.
    Storage,
    /// Unexpected internal failure (poisoned lock, corrupt row).
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error for engine operations.
#[derive(Debug, Serialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    /// Identifiers of the entities the error is about.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(skip)]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ids: Vec::new(),
            source: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_bad_request(&self) -> bool {
        self.kind == ErrorKind::BadRequest
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }

    // Convenience constructors

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found: {}", entity, id)).with_id(id)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::not_found("Task", task_id)
    }

    pub fn project_not_found(project_id: &str) -> Self {
        Self::not_found("Project", project_id)
    }

    pub fn section_not_found(section_id: &str) -> Self {
        Self::not_found("Section", section_id)
    }

    pub fn placement_not_found(task_id: &str, project_id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Task {} is not in project {}", task_id, project_id),
        )
        .with_id(task_id)
        .with_id(project_id)
    }

    pub fn user_not_found(user_id: &str) -> Self {
        Self::not_found("User", user_id)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn section_project_mismatch(section_id: &str, project_id: &str) -> Self {
        Self::bad_request(format!(
            "Section {} does not belong to project {}",
            section_id, project_id
        ))
        .with_id(section_id)
        .with_id(project_id)
    }

    pub fn not_a_subtask(task_id: &str) -> Self {
        Self::bad_request(format!("Task {} is not a subtask", task_id)).with_id(task_id)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn duplicate_placement(task_id: &str, project_id: &str) -> Self {
        Self::conflict(format!(
            "Task {} is already in project {}",
            task_id, project_id
        ))
        .with_id(task_id)
        .with_id(project_id)
    }

    pub fn dependency_cycle(predecessor_id: &str, task_id: &str) -> Self {
        Self::conflict(format!(
            "Adding dependency {} -> {} would create a circular reference",
            predecessor_id, task_id
        ))
        .with_id(predecessor_id)
        .with_id(task_id)
    }

    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = err.to_string();
        Self::new(ErrorKind::Storage, message).with_source(err)
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, message.to_string())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::storage(err)
    }
}

impl From<refinery::Error> for EngineError {
    fn from(err: refinery::Error) -> Self {
        EngineError::storage(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::new(ErrorKind::Internal, err.to_string()).with_source(err)
    }
}

impl From<crate::types::UnknownVariant> for EngineError {
    fn from(err: crate::types::UnknownVariant) -> Self {
        EngineError::bad_request(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_screaming_snake() {
        let err = EngineError::task_not_found("t-1");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "NOT_FOUND");
        assert_eq!(json["ids"][0], "t-1");
    }

    #[test]
    fn storage_errors_keep_their_source() {
        use std::error::Error as _;
        let err = EngineError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.source().is_some());
    }

    #[test]
    fn cycle_is_a_conflict_naming_both_tasks() {
        let err = EngineError::dependency_cycle("a", "b");
        assert!(err.is_conflict());
        assert_eq!(err.ids, vec!["a", "b"]);
        assert!(err.to_string().contains("circular reference"));
    }
}
