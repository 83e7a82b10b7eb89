//! Shared types and errors for the satflow workflow engine.
//!
//! This crate provides the foundational types used across the other satflow crates:
//! - `SatflowError` — unified error taxonomy for planning and execution
//! - `TaskState` — lifecycle state of one task in the graph
//! - `Resources` — thread/memory requirement of a task, or a budget of them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Unified error type for all satflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SatflowError {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Registry Errors ===
    #[error("Rule '{0}' is already registered")]
    DuplicateRule(String),

    #[error("Path '{path}' could be produced by more than one rule: {}", rules.join(", "))]
    AmbiguousProducer { path: String, rules: Vec<String> },

    // === Planning Errors ===
    #[error("No rule produces '{path}' and the file does not exist")]
    NoProducer { path: String },

    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Pattern '{pattern}' requires placeholder '{placeholder}' which is not bound")]
    UnboundPlaceholder { pattern: String, placeholder: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error(
        "Task '{task}' requests {requested} but the budget is {budget}"
    )]
    ResourceExceedsBudget {
        task: String,
        requested: Resources,
        budget: Resources,
    },

    // === Execution Errors ===
    #[error("Task '{task}' failed: {message}")]
    TaskExecution {
        task: String,
        message: String,
        log_path: Option<PathBuf>,
        log_tail: String,
    },

    #[error("Task '{task}' not run: upstream task '{upstream}' failed")]
    UpstreamFailed { task: String, upstream: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SatflowError {
    /// Returns `true` for errors raised while building or extending the task
    /// graph. These always abort the whole run.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            SatflowError::Configuration(_)
                | SatflowError::DuplicateRule(_)
                | SatflowError::AmbiguousProducer { .. }
                | SatflowError::NoProducer { .. }
                | SatflowError::CyclicDependency { .. }
                | SatflowError::UnboundPlaceholder { .. }
                | SatflowError::InvalidPattern { .. }
                | SatflowError::ResourceExceedsBudget { .. }
        )
    }

    /// Returns `true` if the error is transient and re-running the task may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SatflowError::TaskExecution { .. })
    }

    /// The captured log excerpt, when the error carries one.
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            SatflowError::TaskExecution { log_tail, .. } if !log_tail.is_empty() => {
                Some(log_tail)
            }
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, SatflowError>`.
pub type Result<T> = std::result::Result<T, SatflowError>;

// ---------------------------------------------------------------------------
// TaskState — lifecycle of one task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskState {
    /// Terminal states never change again within a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Resources — per-task requirement or global budget
// ---------------------------------------------------------------------------

/// Threads and memory (in MiB). Used both for a task's requirement and for
/// the engine-wide budget; a budget with `mem_mb == u64::MAX` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default)]
    pub mem_mb: u64,
}

fn default_threads() -> u32 {
    1
}

impl Resources {
    pub fn new(threads: u32, mem_mb: u64) -> Self {
        Self { threads, mem_mb }
    }

    /// Returns `true` if `self` fits inside `budget`.
    pub fn fits_within(&self, budget: &Resources) -> bool {
        self.threads <= budget.threads && self.mem_mb <= budget.mem_mb
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            threads: self.threads.saturating_sub(other.threads),
            mem_mb: self.mem_mb.saturating_sub(other.mem_mb),
        }
    }

    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            threads: self.threads.saturating_add(other.threads),
            mem_mb: self.mem_mb.saturating_add(other.mem_mb),
        }
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            threads: 1,
            mem_mb: 0,
        }
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mem_mb == u64::MAX {
            write!(f, "threads={}, mem=unbounded", self.threads)
        } else {
            write!(f, "threads={}, mem={}MB", self.threads, self.mem_mb)
        }
    }
}
