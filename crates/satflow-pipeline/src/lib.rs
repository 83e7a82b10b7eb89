//! Workflow planning and execution for satflow.
//!
//! Rules declare templated inputs and outputs; the planner resolves target
//! paths backwards into a task graph, checkpoint tasks extend that graph
//! with work discovered on disk, and the executor runs ready tasks in
//! parallel under a thread and memory budget.

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod events;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod planner;
pub mod retry;
pub mod rule;
pub mod runner;
pub mod template;
pub mod validation;
pub mod wildcard;

pub use checkpoint::{replan, CheckpointResult, ReplanReport};
pub use config::{ConfigStore, EngineConfig, Workflow};
pub use engine::{Executor, FailureReport, ResourceLedger, RunSummary};
pub use events::{EngineEvent, EventEmitter};
pub use graph::{CheckpointHook, Task, TaskFailure, TaskGraph, TaskId, TaskInput, TaskOutput};
pub use handler::{default_registry, ActionContext, ActionHandler, HandlerRegistry};
pub use handlers::{MergeSortedHandler, ShellHandler, TouchHandler};
pub use planner::Planner;
pub use retry::{execute_with_retry, BackoffPolicy};
pub use rule::{ActionSpec, InputKind, InputSpec, OutputSpec, ParamValue, RuleDecl, RuleRegistry, RuleSpec, SortKey};
pub use runner::{TaskReport, TaskRunner};
pub use template::{render_command, shell_quote};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
pub use wildcard::{discover, instantiate, match_path, Binding, Pattern};
