use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StatusError;

/// Opaque identifier of a job on the backend.
///
/// Only equality is meaningful; the backend decides the format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Processing status of a job as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Error,
}

impl Status {
    /// `Completed` and `Error` end tracking; `Pending` does not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }

    /// Parse the wire representation. Anything outside the three known
    /// values is a protocol violation.
    pub fn parse(raw: &str) -> Result<Self, StatusError> {
        match raw {
            "pending" => Ok(Status::Pending),
            "completed" => Ok(Status::Completed),
            "error" => Ok(Status::Error),
            other => Err(StatusError::Protocol(format!(
                "unrecognized status value {other:?}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status observation for one job, pushed by the server or synthesized by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: Status,
}
