//! Checkpoint re-planning.
//!
//! A checkpoint task writes a directory whose contents are only known after it
//! runs. Each consumer that aggregates over it registered a
//! [`CheckpointHook`] at planning time. Once the checkpoint succeeds,
//! [`replan`] scans the directory, instantiates every hook's target templates
//! for each discovered entry, plans whatever produces them, and wires the
//! results into the consumer. Re-running against an unchanged directory adds
//! nothing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use satflow_types::Result;

use crate::graph::{CheckpointHook, TaskGraph, TaskId};
use crate::planner::{normalize, Planner};
use crate::wildcard::{discover, Binding, Pattern};

/// Entries discovered in one checkpoint directory. Consumed once.
#[derive(Debug, Clone, Default)]
pub struct CheckpointResult {
    pub directory: PathBuf,
    pub bindings: BTreeSet<Binding>,
}

impl CheckpointResult {
    pub fn scan(planner: &Planner, directory: &Path, pattern: &Pattern) -> Result<Self> {
        let bindings = discover(&planner.config().resolve(directory), pattern)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            bindings,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplanReport {
    /// Discovered entries, summed over hooks.
    pub discovered: usize,
    pub new_tasks: Vec<TaskId>,
    /// Paths appended to consumers' aggregate inputs.
    pub new_inputs: usize,
}

impl ReplanReport {
    fn absorb(&mut self, other: ReplanReport) {
        self.discovered += other.discovered;
        self.new_tasks.extend(other.new_tasks);
        self.new_inputs += other.new_inputs;
    }
}

/// Extend `graph` with the consumers of a succeeded checkpoint task.
pub fn replan(planner: &Planner, graph: &mut TaskGraph, checkpoint: &TaskId) -> Result<ReplanReport> {
    let mut report = ReplanReport::default();
    for hook in graph.hooks_for(checkpoint) {
        report.absorb(expand_hook(planner, graph, &hook)?);
    }
    graph.mark_replanned(checkpoint);
    tracing::info!(
        checkpoint = %checkpoint,
        discovered = report.discovered,
        new_tasks = report.new_tasks.len(),
        new_inputs = report.new_inputs,
        "Checkpoint re-planned"
    );
    Ok(report)
}

pub(crate) fn expand_hook(
    planner: &Planner,
    graph: &mut TaskGraph,
    hook: &CheckpointHook,
) -> Result<ReplanReport> {
    let base = hook
        .consumer
        .binding
        .merge(&hook.checkpoint.binding)
        .unwrap_or_else(|| hook.consumer.binding.clone());
    expand_aggregate(
        planner,
        graph,
        &hook.consumer,
        &hook.input,
        &hook.directory,
        &hook.pattern,
        &hook.targets,
        &base,
    )
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn expand_aggregate(
    planner: &Planner,
    graph: &mut TaskGraph,
    consumer: &TaskId,
    input: &str,
    directory: &Path,
    pattern: &Pattern,
    targets: &[Pattern],
    base: &Binding,
) -> Result<ReplanReport> {
    let result = CheckpointResult::scan(planner, directory, pattern)?;
    let before = graph.ids();
    let mut report = ReplanReport {
        discovered: result.bindings.len(),
        ..Default::default()
    };

    for found in &result.bindings {
        let Some(binding) = base.merge(found) else {
            tracing::warn!(
                consumer = %consumer,
                entry = %found,
                "Discovered entry conflicts with consumer binding, ignoring"
            );
            continue;
        };
        for target in targets {
            let path = normalize(Path::new(&target.instantiate(&binding)?));
            let known = graph
                .task(consumer)
                .and_then(|t| t.input(input))
                .is_some_and(|i| i.paths.contains(&path));
            if known {
                continue;
            }
            let producer = planner.resolve_path(graph, &path)?;
            graph.append_input(consumer, input, path);
            report.new_inputs += 1;
            if let Some(producer) = producer {
                graph.add_dependency(consumer, &producer)?;
            }
        }
    }

    report.new_tasks = graph
        .ids()
        .into_iter()
        .filter(|id| !before.contains(id))
        .collect();
    tracing::debug!(
        consumer = %consumer,
        dir = %directory.display(),
        discovered = report.discovered,
        new_tasks = report.new_tasks.len(),
        "Expanded aggregate input"
    );
    Ok(report)
}
