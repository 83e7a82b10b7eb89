//! The live task graph.
//!
//! The graph owns every [`Task`]; tasks refer to each other only by
//! [`TaskId`]. Edges point from a task to the tasks it depends on, with a
//! reverse index for propagation. The graph stays acyclic: every edge
//! insertion is checked.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use satflow_types::{Resources, Result, SatflowError, TaskState};

use crate::rule::RuleSpec;
use crate::wildcard::{Binding, Pattern};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Rule name plus binding; unique within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId {
    pub rule: String,
    pub binding: Binding,
}

impl TaskId {
    pub fn new(rule: impl Into<String>, binding: Binding) -> Self {
        Self {
            rule: rule.into(),
            binding,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.binding.is_empty() {
            write!(f, "{}", self.rule)
        } else {
            write!(f, "{}[{}]", self.rule, self.binding)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub name: String,
    pub paths: Vec<PathBuf>,
    /// Filled by checkpoint re-planning rather than at planning time.
    pub aggregate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub name: String,
    pub path: PathBuf,
    pub temp: bool,
    pub directory: bool,
    pub allow_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub message: String,
    pub log_path: Option<PathBuf>,
    pub log_tail: String,
    /// Set when the task never ran because this upstream task failed.
    pub upstream: Option<TaskId>,
}

/// One concrete instantiation of a rule.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub rule: Arc<RuleSpec>,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
    pub params: BTreeMap<String, Value>,
    pub resources: Resources,
    pub log_path: PathBuf,
    pub benchmark_path: PathBuf,
    pub timeout: Option<Duration>,
    state: TaskState,
    deps: BTreeSet<TaskId>,
    failure: Option<TaskFailure>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        rule: Arc<RuleSpec>,
        inputs: Vec<TaskInput>,
        outputs: Vec<TaskOutput>,
        params: BTreeMap<String, Value>,
        resources: Resources,
        log_path: PathBuf,
        benchmark_path: PathBuf,
    ) -> Self {
        let timeout = rule.timeout;
        Self {
            id,
            rule,
            inputs,
            outputs,
            params,
            resources,
            log_path,
            benchmark_path,
            timeout,
            state: TaskState::Pending,
            deps: BTreeSet::new(),
            failure: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn deps(&self) -> &BTreeSet<TaskId> {
        &self.deps
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    pub fn is_checkpoint(&self) -> bool {
        self.rule.is_checkpoint()
    }

    pub fn input(&self, name: &str) -> Option<&TaskInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TaskOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn input_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.inputs.iter().flat_map(|i| i.paths.iter())
    }

    pub fn output_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.outputs.iter().map(|o| &o.path)
    }
}

// ---------------------------------------------------------------------------
// Checkpoint hooks
// ---------------------------------------------------------------------------

/// An aggregate input waiting on a checkpoint's real output.
#[derive(Debug, Clone)]
pub struct CheckpointHook {
    pub checkpoint: TaskId,
    pub consumer: TaskId,
    pub input: String,
    pub directory: PathBuf,
    pub pattern: Pattern,
    pub targets: Vec<Pattern>,
}

// ---------------------------------------------------------------------------
// TaskGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
    producers: BTreeMap<PathBuf, TaskId>,
    directories: BTreeMap<PathBuf, TaskId>,
    hooks: Vec<CheckpointHook>,
    replanned: BTreeSet<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> BTreeSet<TaskId> {
        self.tasks.keys().cloned().collect()
    }

    pub fn ids_in_state(&self, state: TaskState) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.state == state)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    pub fn dependents(&self, id: &TaskId) -> impl Iterator<Item = &TaskId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Tasks with no dependencies.
    pub fn leaves(&self) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.deps.is_empty()).collect()
    }

    /// The task that will write `path`: an exact output, or a directory output
    /// containing it.
    pub fn producer_of(&self, path: &Path) -> Option<&TaskId> {
        if let Some(id) = self.producers.get(path) {
            return Some(id);
        }
        path.ancestors()
            .skip(1)
            .find_map(|dir| self.directories.get(dir))
    }

    /// Add a task. Returns `false` if a task with the same identity exists.
    pub fn insert_task(&mut self, task: Task) -> Result<bool> {
        if self.tasks.contains_key(&task.id) {
            return Ok(false);
        }
        for output in &task.outputs {
            if let Some(other) = self.producers.get(&output.path) {
                return Err(SatflowError::AmbiguousProducer {
                    path: output.path.display().to_string(),
                    rules: vec![other.to_string(), task.id.to_string()],
                });
            }
        }
        for output in &task.outputs {
            self.producers.insert(output.path.clone(), task.id.clone());
            if output.directory {
                self.directories.insert(output.path.clone(), task.id.clone());
            }
        }
        tracing::debug!(task = %task.id, "Task planned");
        self.dependents.entry(task.id.clone()).or_default();
        self.tasks.insert(task.id.clone(), task);
        Ok(true)
    }

    /// Record that `task` depends on `dep`. Rejects edges that would close a cycle.
    pub fn add_dependency(&mut self, task: &TaskId, dep: &TaskId) -> Result<()> {
        for id in [task, dep] {
            if !self.tasks.contains_key(id) {
                return Err(SatflowError::Other(format!("unknown task {id}")));
            }
        }
        if let Some(path) = self.dependency_path(dep, task) {
            let mut cycle: Vec<String> = vec![task.to_string()];
            cycle.extend(path.iter().map(ToString::to_string));
            return Err(SatflowError::CyclicDependency { cycle });
        }
        if let Some(t) = self.tasks.get_mut(task) {
            t.deps.insert(dep.clone());
        }
        self.dependents
            .entry(dep.clone())
            .or_default()
            .insert(task.clone());
        Ok(())
    }

    /// A dependency chain `from -> ... -> to`, if `from` transitively depends on `to`.
    fn dependency_path(&self, from: &TaskId, to: &TaskId) -> Option<Vec<TaskId>> {
        let mut parent: BTreeMap<&TaskId, &TaskId> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = BTreeSet::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == to {
                let mut path = vec![id.clone()];
                let mut cur = id;
                while let Some(&p) = parent.get(cur) {
                    path.push(p.clone());
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }
            for dep in self.tasks.get(id).into_iter().flat_map(|t| t.deps.iter()) {
                if seen.insert(dep) {
                    parent.insert(dep, id);
                    queue.push_back(dep);
                }
            }
        }
        None
    }

    pub fn depends_on(&self, task: &TaskId, dep: &TaskId) -> bool {
        task != dep && self.dependency_path(task, dep).is_some()
    }

    /// Every task that directly or transitively depends on `id`.
    pub fn transitive_dependents(&self, id: &TaskId) -> BTreeSet<TaskId> {
        let mut out = BTreeSet::new();
        let mut queue: VecDeque<&TaskId> = self.dependents(id).collect();
        while let Some(next) = queue.pop_front() {
            if out.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }
        out
    }

    /// Dependencies before dependents; ties broken by identity.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let mut remaining: BTreeMap<&TaskId, usize> =
            self.tasks.values().map(|t| (&t.id, t.deps.len())).collect();
        let mut ready: BTreeSet<&TaskId> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for dependent in self.dependents(id) {
                if let Some(n) = remaining.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.tasks.len() {
            let stuck: Vec<String> = remaining
                .into_iter()
                .filter(|(_, n)| *n > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(SatflowError::CyclicDependency { cycle: stuck });
        }
        Ok(order)
    }

    // -- checkpoint hooks ---------------------------------------------------

    /// Returns `false` when an identical hook is already registered.
    pub fn add_hook(&mut self, hook: CheckpointHook) -> bool {
        let exists = self.hooks.iter().any(|h| {
            h.checkpoint == hook.checkpoint && h.consumer == hook.consumer && h.input == hook.input
        });
        if !exists {
            self.hooks.push(hook);
        }
        !exists
    }

    pub fn hooks_for(&self, checkpoint: &TaskId) -> Vec<CheckpointHook> {
        self.hooks
            .iter()
            .filter(|h| &h.checkpoint == checkpoint)
            .cloned()
            .collect()
    }

    pub fn is_replanned(&self, checkpoint: &TaskId) -> bool {
        self.replanned.contains(checkpoint)
    }

    pub(crate) fn mark_replanned(&mut self, checkpoint: &TaskId) {
        self.replanned.insert(checkpoint.clone());
    }

    // -- mutation reserved for the executor and re-planner -------------------

    pub(crate) fn set_state(&mut self, id: &TaskId, state: TaskState) {
        if let Some(t) = self.tasks.get_mut(id) {
            t.state = state;
        }
    }

    pub(crate) fn set_failure(&mut self, id: &TaskId, failure: TaskFailure) {
        if let Some(t) = self.tasks.get_mut(id) {
            t.state = TaskState::Failed;
            t.failure = Some(failure);
        }
    }

    /// Append `path` to a consumer's named input. Returns `false` if present.
    pub(crate) fn append_input(&mut self, id: &TaskId, input: &str, path: PathBuf) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        match task.inputs.iter_mut().find(|i| i.name == input) {
            Some(slot) if slot.paths.contains(&path) => false,
            Some(slot) => {
                slot.paths.push(path);
                true
            }
            None => {
                task.inputs.push(TaskInput {
                    name: input.to_string(),
                    paths: vec![path],
                    aggregate: true,
                });
                true
            }
        }
    }
}
