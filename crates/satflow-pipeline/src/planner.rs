//! DAG planner: from requested target paths to a task graph.
//!
//! Resolution is a depth-first walk over concrete paths. A path already
//! produced by a planned task resolves to that task; a path no rule produces
//! must exist on disk; otherwise the producing rule is instantiated under the
//! binding its output match yields and its inputs are resolved in turn. The
//! stack of paths being resolved doubles as the cycle detector.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use satflow_types::{Result, SatflowError};

use crate::checkpoint;
use crate::config::{ConfigStore, EngineConfig};
use crate::graph::{CheckpointHook, Task, TaskGraph, TaskId, TaskInput, TaskOutput};
use crate::rule::{InputKind, RuleRegistry, RuleSpec};
use crate::wildcard::{Binding, Pattern};

/// Drop `.` components so equal paths compare equal.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Planner {
    registry: Arc<RuleRegistry>,
    store: Arc<ConfigStore>,
    config: EngineConfig,
}

/// An aggregate input seen while building a task, wired up once the task
/// itself is in the graph.
struct PendingAggregate {
    input: String,
    checkpoint: Option<TaskId>,
    directory: PathBuf,
    pattern: Pattern,
    targets: Vec<Pattern>,
}

impl Planner {
    pub fn new(registry: Arc<RuleRegistry>, store: Arc<ConfigStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Build a fresh graph for `targets`.
    pub fn plan(&self, targets: &[PathBuf]) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        self.extend(&mut graph, targets)?;
        tracing::info!(targets = targets.len(), tasks = graph.len(), "Planned task graph");
        Ok(graph)
    }

    /// Resolve more targets into an existing graph, reusing tasks already
    /// planned. Returns the identities of tasks that were added.
    pub fn extend(&self, graph: &mut TaskGraph, targets: &[PathBuf]) -> Result<Vec<TaskId>> {
        let before = graph.ids();
        for target in targets {
            self.resolve_path(graph, target)?;
        }
        Ok(graph
            .ids()
            .into_iter()
            .filter(|id| !before.contains(id))
            .collect())
    }

    /// The task producing `path`, `None` when an existing file satisfies it.
    pub fn resolve_path(&self, graph: &mut TaskGraph, path: &Path) -> Result<Option<TaskId>> {
        let mut stack = Vec::new();
        self.resolve(graph, path, &mut stack)
    }

    fn resolve(
        &self,
        graph: &mut TaskGraph,
        path: &Path,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Option<TaskId>> {
        let path = normalize(path);
        if let Some(id) = graph.producer_of(&path) {
            return Ok(Some(id.clone()));
        }
        if let Some(pos) = stack.iter().position(|p| p == &path) {
            let cycle = stack[pos..]
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| p.display().to_string())
                .collect();
            return Err(SatflowError::CyclicDependency { cycle });
        }

        let path_str = path.to_str().ok_or_else(|| {
            SatflowError::Configuration(format!("path is not valid UTF-8: {}", path.display()))
        })?;
        let Some((rule, binding)) = self.registry.lookup_by_output_pattern(path_str)? else {
            if self.exists(&path) {
                tracing::debug!(path = %path.display(), "Satisfied by existing file");
                return Ok(None);
            }
            return Err(SatflowError::NoProducer {
                path: path_str.to_string(),
            });
        };
        if self.exists(&path) {
            tracing::debug!(path = %path.display(), rule = %rule.name, "Output already present, not planning");
            return Ok(None);
        }

        let id = TaskId::new(rule.name.clone(), binding.clone());
        if graph.contains(&id) {
            return Ok(Some(id));
        }

        stack.push(path);
        let built = self.build(graph, &rule, &binding, stack);
        stack.pop();
        built.map(Some)
    }

    fn build(
        &self,
        graph: &mut TaskGraph,
        rule: &Arc<RuleSpec>,
        binding: &Binding,
        stack: &mut Vec<PathBuf>,
    ) -> Result<TaskId> {
        let task = self.instantiate(rule, binding)?;
        let budget = self.config.budget();
        if !task.resources.fits_within(&budget) {
            return Err(SatflowError::ResourceExceedsBudget {
                task: task.id.to_string(),
                requested: task.resources,
                budget,
            });
        }

        let mut deps = BTreeSet::new();
        let mut aggregates = Vec::new();
        for (spec, input) in rule.inputs.iter().zip(&task.inputs) {
            match &spec.kind {
                InputKind::Path(_) => {
                    for p in &input.paths {
                        if let Some(dep) = self.resolve(graph, p, stack)? {
                            deps.insert(dep);
                        }
                    }
                }
                InputKind::Aggregate {
                    checkpoint: name,
                    targets,
                } => {
                    let ck_rule = self.registry.get(name).ok_or_else(|| {
                        SatflowError::Configuration(format!(
                            "rule '{}' aggregates over unknown rule '{name}'",
                            rule.name
                        ))
                    })?;
                    let (Some(dir_out), Some(pattern)) =
                        (ck_rule.checkpoint_directory(), ck_rule.checkpoint.as_ref())
                    else {
                        return Err(SatflowError::Configuration(format!(
                            "rule '{name}' is not a checkpoint with a directory output"
                        )));
                    };
                    let directory = normalize(Path::new(&dir_out.pattern.instantiate(binding)?));
                    let checkpoint = self.resolve(graph, &directory, stack)?;
                    if let Some(ck) = &checkpoint {
                        deps.insert(ck.clone());
                    }
                    aggregates.push(PendingAggregate {
                        input: spec.name.clone(),
                        checkpoint,
                        directory,
                        pattern: pattern.clone(),
                        targets: targets.clone(),
                    });
                }
            }
        }

        let id = task.id.clone();
        graph.insert_task(task)?;
        for dep in &deps {
            graph.add_dependency(&id, dep)?;
        }

        for agg in aggregates {
            match agg.checkpoint {
                Some(checkpoint) => {
                    let hook = CheckpointHook {
                        checkpoint,
                        consumer: id.clone(),
                        input: agg.input,
                        directory: agg.directory,
                        pattern: agg.pattern,
                        targets: agg.targets,
                    };
                    let already_run = graph.is_replanned(&hook.checkpoint);
                    graph.add_hook(hook.clone());
                    if already_run {
                        checkpoint::expand_hook(self, graph, &hook)?;
                    }
                }
                None => {
                    tracing::debug!(
                        task = %id,
                        dir = %agg.directory.display(),
                        "Checkpoint output already present, expanding during planning"
                    );
                    checkpoint::expand_aggregate(
                        self,
                        graph,
                        &id,
                        &agg.input,
                        &agg.directory,
                        &agg.pattern,
                        &agg.targets,
                        &id.binding,
                    )?;
                }
            }
        }
        Ok(id)
    }

    /// Concrete task for `rule` under `binding`. Aggregate inputs start empty.
    pub fn instantiate(&self, rule: &Arc<RuleSpec>, binding: &Binding) -> Result<Task> {
        let id = TaskId::new(rule.name.clone(), binding.clone());

        let mut inputs = Vec::with_capacity(rule.inputs.len());
        for spec in &rule.inputs {
            inputs.push(match &spec.kind {
                InputKind::Path(p) => TaskInput {
                    name: spec.name.clone(),
                    paths: vec![normalize(Path::new(&p.instantiate(binding)?))],
                    aggregate: false,
                },
                InputKind::Aggregate { .. } => TaskInput {
                    name: spec.name.clone(),
                    paths: Vec::new(),
                    aggregate: true,
                },
            });
        }

        let mut outputs = Vec::with_capacity(rule.outputs.len());
        for spec in &rule.outputs {
            outputs.push(TaskOutput {
                name: spec.name.clone(),
                path: normalize(Path::new(&spec.pattern.instantiate(binding)?)),
                temp: spec.temp,
                directory: spec.directory,
                allow_empty: spec.allow_empty,
            });
        }

        let mut params = std::collections::BTreeMap::new();
        for (name, value) in &rule.params {
            params.insert(name.clone(), value.resolve(binding, &self.store)?);
        }
        let resources = rule.resources.resolve(binding, &self.store)?;

        let stem = if binding.is_empty() {
            rule.name.clone()
        } else {
            binding.slug()
        };
        let log_path = match &rule.log {
            Some(p) => normalize(Path::new(&p.instantiate(binding)?)),
            None => self.config.log_dir.join(&rule.name).join(format!("{stem}.log")),
        };
        let benchmark_path = match &rule.benchmark {
            Some(p) => normalize(Path::new(&p.instantiate(binding)?)),
            None => self
                .config
                .benchmark_dir
                .join(&rule.name)
                .join(format!("{stem}.tsv")),
        };

        let mut task = Task::new(
            id,
            Arc::clone(rule),
            inputs,
            outputs,
            params,
            resources,
            log_path,
            benchmark_path,
        );
        task.timeout = rule.timeout.or_else(|| self.config.default_timeout());
        Ok(task)
    }

    fn exists(&self, path: &Path) -> bool {
        self.config.resolve(path).exists()
    }
}
