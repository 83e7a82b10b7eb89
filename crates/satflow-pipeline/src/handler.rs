//! Action handler trait and handler registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use satflow_tools::{ExecResult, ToolInvoker};
use satflow_types::Result;

use crate::graph::Task;
use crate::handlers::{MergeSortedHandler, ShellHandler, TouchHandler};

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// Everything an action may touch while running one task.
pub struct ActionContext<'a> {
    pub task: &'a Task,
    pub workdir: &'a Path,
    /// Scratch directory, removed after the attempt unless kept.
    pub tmpdir: &'a Path,
    pub invoker: &'a dyn ToolInvoker,
}

impl ActionContext<'_> {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

// ---------------------------------------------------------------------------
// ActionHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The action type identifier (e.g. "shell", "merge_sorted").
    fn handler_type(&self) -> &str;

    /// Run the task's action. A nonzero exit is reported in the result, not
    /// as an error; errors mean the action could not be carried out at all.
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ExecResult>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        let t = handler.handler_type().to_string();
        self.handlers.insert(t, Arc::new(handler));
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    pub fn has(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }
}

/// A registry with the built-in `shell`, `merge_sorted` and `touch` handlers.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(ShellHandler);
    registry.register(MergeSortedHandler);
    registry.register(TouchHandler);
    registry
}
