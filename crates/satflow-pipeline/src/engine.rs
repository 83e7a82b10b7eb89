//! Task scheduler and executor.
//!
//! One loop owns the graph and the resource ledger. Each pass promotes
//! pending tasks whose dependencies all succeeded, dispatches ready tasks
//! that fit the free ledger and the job cap, then waits for one running task
//! to finish. Re-planning after a checkpoint happens inside the loop, so no
//! task is dispatched while the graph is being extended.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{Id, JoinSet};

use satflow_tools::{LocalInvoker, ToolInvoker};
use satflow_types::{Resources, Result, SatflowError, TaskState};

use crate::checkpoint;
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventEmitter};
use crate::graph::{TaskFailure, TaskGraph, TaskId};
use crate::handler::{default_registry, HandlerRegistry};
use crate::planner::Planner;
use crate::runner::{input_problem, TaskReport, TaskRunner};

// ---------------------------------------------------------------------------
// ResourceLedger
// ---------------------------------------------------------------------------

/// Free threads and memory. Only the scheduling loop touches it.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    total: Resources,
    free: Resources,
}

impl ResourceLedger {
    pub fn new(total: Resources) -> Self {
        Self { total, free: total }
    }

    pub fn total(&self) -> Resources {
        self.total
    }

    pub fn free(&self) -> Resources {
        self.free
    }

    /// Reserve `request` if it fits what is free.
    pub fn try_acquire(&mut self, request: &Resources) -> bool {
        if !request.fits_within(&self.free) {
            return false;
        }
        self.free = self.free.saturating_sub(request);
        true
    }

    pub fn release(&mut self, request: &Resources) {
        let restored = self.free.saturating_add(request);
        self.free = Resources::new(
            restored.threads.min(self.total.threads),
            restored.mem_mb.min(self.total.mem_mb),
        );
    }

    pub fn is_idle(&self) -> bool {
        self.free == self.total
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub task: String,
    pub message: String,
    pub log_path: Option<PathBuf>,
    pub log_tail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tasks that failed on their own, not because of an upstream failure.
    pub failures: Vec<FailureReport>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Tasks in the join set, keyed by tokio task id so a panicked or aborted
/// task can still be charged to the right graph node.
type InFlight = HashMap<Id, (TaskId, Resources)>;

pub struct Executor {
    planner: Planner,
    config: Arc<EngineConfig>,
    handlers: Arc<HandlerRegistry>,
    invoker: Arc<dyn ToolInvoker>,
    events: EventEmitter,
}

impl Executor {
    /// Executor with local subprocess invocation and the built-in handlers.
    pub fn new(planner: Planner) -> Self {
        let config = Arc::new(planner.config().clone());
        Self {
            planner,
            config,
            handlers: Arc::new(default_registry()),
            invoker: Arc::new(LocalInvoker::new()),
            events: EventEmitter::default(),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Drive `graph` to completion. Task failures are reported in the
    /// summary; an `Err` means re-planning failed and the run was aborted.
    pub async fn run(&self, graph: &mut TaskGraph) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let budget = self.config.budget();
        for task in graph.tasks() {
            if !task.resources.fits_within(&budget) {
                return Err(SatflowError::ResourceExceedsBudget {
                    task: task.id.to_string(),
                    requested: task.resources,
                    budget,
                });
            }
        }

        let runner = TaskRunner::new(
            Arc::clone(&self.handlers),
            Arc::clone(&self.invoker),
            Arc::clone(&self.config),
        );
        let mut ledger = ResourceLedger::new(budget);
        let max_jobs = self.config.max_jobs();
        let mut running: JoinSet<Result<TaskReport>> = JoinSet::new();
        let mut in_flight = InFlight::new();
        let mut failures = Vec::new();
        let mut cleaned = BTreeSet::new();
        let mut deferred = BTreeSet::new();
        let mut halted = false;
        let mut fatal: Option<SatflowError> = None;

        tracing::info!(
            tasks = graph.len(),
            budget = %budget,
            jobs = max_jobs,
            keep_going = self.config.keep_going,
            "Starting run"
        );
        self.events.emit(EngineEvent::RunStarted {
            task_count: graph.len(),
            started_at,
        });

        loop {
            self.promote(graph);
            if !halted {
                let failed_at_dispatch = self.dispatch(
                    graph,
                    &mut ledger,
                    &mut running,
                    &mut in_flight,
                    &runner,
                    max_jobs,
                    &mut failures,
                );
                if failed_at_dispatch && !self.config.keep_going {
                    halted = true;
                }
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (tokio_id, outcome) = match joined {
                Ok((tokio_id, outcome)) => (tokio_id, outcome),
                Err(e) => (e.id(), Err(SatflowError::Other(format!("task aborted: {e}")))),
            };
            let Some((id, resources)) = in_flight.remove(&tokio_id) else {
                tracing::error!(task_id = %tokio_id, "Finished task was not tracked");
                continue;
            };
            ledger.release(&resources);

            match outcome {
                Ok(report) => {
                    graph.set_state(&id, TaskState::Succeeded);
                    tracing::info!(
                        task = %id,
                        wall_ms = report.wall_time.as_millis() as u64,
                        attempts = report.attempts,
                        "Task succeeded"
                    );
                    self.events.emit(EngineEvent::TaskSucceeded {
                        task: id.to_string(),
                        duration_ms: report.wall_time.as_millis() as u64,
                    });

                    let is_checkpoint = graph.task(&id).is_some_and(|t| t.is_checkpoint());
                    if is_checkpoint && !halted {
                        match checkpoint::replan(&self.planner, graph, &id) {
                            Ok(report) => self.events.emit(EngineEvent::CheckpointReplanned {
                                task: id.to_string(),
                                discovered: report.discovered,
                                new_tasks: report.new_tasks.len(),
                            }),
                            Err(e) => {
                                tracing::error!(checkpoint = %id, error = %e, "Re-planning failed, aborting run");
                                fatal = Some(e);
                                halted = true;
                            }
                        }
                    }
                    self.remove_temp_outputs(graph, &id, &mut cleaned, &mut deferred)
                        .await;
                }
                Err(e) => {
                    self.fail(graph, &id, e, &mut failures);
                    if !self.config.keep_going {
                        tracing::warn!(task = %id, "Failing fast: no further tasks will start");
                        halted = true;
                    }
                }
            }
        }

        for task in graph.tasks().filter(|t| !t.state().is_terminal()) {
            if !halted {
                tracing::warn!(task = %task.id, state = %task.state(), "Task never became runnable");
            }
        }
        let leftover: Vec<TaskId> = graph
            .tasks()
            .filter(|t| !t.state().is_terminal())
            .map(|t| t.id.clone())
            .collect();
        for id in leftover {
            graph.set_state(&id, TaskState::Skipped);
            self.events.emit(EngineEvent::TaskSkipped { task: id.to_string() });
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let summary = RunSummary {
            started_at,
            duration: clock.elapsed(),
            succeeded: graph.count(TaskState::Succeeded),
            failed: graph.count(TaskState::Failed),
            skipped: graph.count(TaskState::Skipped),
            failures,
        };
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.duration.as_millis() as u64,
            "Run finished"
        );
        self.events.emit(EngineEvent::RunFinished {
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_ms: summary.duration.as_millis() as u64,
        });
        Ok(summary)
    }

    /// Pending → ready once every dependency succeeded.
    fn promote(&self, graph: &mut TaskGraph) {
        for id in graph.ids_in_state(TaskState::Pending) {
            let Some(task) = graph.task(&id) else { continue };
            let mut ready = true;
            let mut failed_dep = None;
            for dep in task.deps() {
                match graph.task(dep).map(|t| t.state()) {
                    Some(TaskState::Succeeded) => {}
                    Some(TaskState::Failed) => failed_dep = Some(dep.clone()),
                    _ => ready = false,
                }
            }
            if let Some(upstream) = failed_dep {
                self.mark_upstream_failed(graph, &id, &upstream);
            } else if ready {
                tracing::debug!(task = %id, "Task ready");
                graph.set_state(&id, TaskState::Ready);
            }
        }
    }

    /// Start ready tasks that fit. Returns `true` if any task failed its
    /// input check; without `keep_going` nothing more is started after that.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        graph: &mut TaskGraph,
        ledger: &mut ResourceLedger,
        running: &mut JoinSet<Result<TaskReport>>,
        in_flight: &mut InFlight,
        runner: &TaskRunner,
        max_jobs: usize,
        failures: &mut Vec<FailureReport>,
    ) -> bool {
        let mut any_failed = false;
        for id in graph.ids_in_state(TaskState::Ready) {
            if running.len() >= max_jobs {
                break;
            }
            let Some(task) = graph.task(&id).cloned() else { continue };
            if !ledger.try_acquire(&task.resources) {
                tracing::debug!(task = %id, free = %ledger.free(), "Waiting for resources");
                continue;
            }
            if let Some(problem) = input_problem(&self.config, &task, |p| self.permits_empty(graph, p)) {
                ledger.release(&task.resources);
                let err = SatflowError::TaskExecution {
                    task: id.to_string(),
                    message: problem,
                    log_path: None,
                    log_tail: String::new(),
                };
                self.fail(graph, &id, err, failures);
                any_failed = true;
                if !self.config.keep_going {
                    tracing::warn!(task = %id, "Failing fast: no further tasks will start");
                    break;
                }
                continue;
            }

            graph.set_state(&id, TaskState::Running);
            tracing::info!(
                task = %id,
                threads = task.resources.threads,
                mem_mb = task.resources.mem_mb,
                "Starting task"
            );
            self.events.emit(EngineEvent::TaskStarted {
                task: id.to_string(),
                rule: task.rule.name.clone(),
            });

            let runner = runner.clone();
            let resources = task.resources;
            let handle = running.spawn(async move { runner.run(&task).await });
            in_flight.insert(handle.id(), (id, resources));
        }
        any_failed
    }

    /// Whether a zero-length `path` is an acceptable input.
    fn permits_empty(&self, graph: &TaskGraph, path: &Path) -> bool {
        if let Some(task) = graph.producer_of(path).and_then(|id| graph.task(id)) {
            return task.outputs.iter().any(|o| {
                (o.path == path && (o.allow_empty || task.rule.action.may_produce_empty()))
                    || (o.directory && path.starts_with(&o.path))
            });
        }
        let Some(s) = path.to_str() else { return false };
        match self.planner.registry().lookup_by_output_pattern(s) {
            Ok(Some((rule, _))) => rule.outputs.iter().any(|o| {
                o.pattern.matches(s).is_some() && (o.allow_empty || rule.action.may_produce_empty())
            }),
            _ => false,
        }
    }

    fn fail(
        &self,
        graph: &mut TaskGraph,
        id: &TaskId,
        error: SatflowError,
        failures: &mut Vec<FailureReport>,
    ) {
        let (message, log_path, log_tail) = match &error {
            SatflowError::TaskExecution {
                message,
                log_path,
                log_tail,
                ..
            } => (message.clone(), log_path.clone(), log_tail.clone()),
            other => (other.to_string(), None, String::new()),
        };
        tracing::error!(
            task = %id,
            error = %message,
            log = ?log_path,
            "Task failed"
        );
        self.events.emit(EngineEvent::TaskFailed {
            task: id.to_string(),
            error: message.clone(),
        });
        failures.push(FailureReport {
            task: id.to_string(),
            message: message.clone(),
            log_path: log_path.clone(),
            log_tail: log_tail.clone(),
        });
        graph.set_failure(
            id,
            TaskFailure {
                message,
                log_path,
                log_tail,
                upstream: None,
            },
        );

        for dependent in graph.transitive_dependents(id) {
            self.mark_upstream_failed(graph, &dependent, id);
        }
    }

    fn mark_upstream_failed(&self, graph: &mut TaskGraph, id: &TaskId, upstream: &TaskId) {
        let state = graph.task(id).map(|t| t.state());
        if !matches!(state, Some(TaskState::Pending | TaskState::Ready)) {
            return;
        }
        let message = SatflowError::UpstreamFailed {
            task: id.to_string(),
            upstream: upstream.to_string(),
        }
        .to_string();
        tracing::warn!(task = %id, upstream = %upstream, "Not running: upstream failed");
        self.events.emit(EngineEvent::TaskFailed {
            task: id.to_string(),
            error: message.clone(),
        });
        graph.set_failure(
            id,
            TaskFailure {
                message,
                log_path: None,
                log_tail: String::new(),
                upstream: Some(upstream.clone()),
            },
        );
    }

    /// Delete `temp` outputs whose every known consumer has succeeded.
    ///
    /// While a checkpoint has yet to re-plan, it may still add consumers of
    /// any file, so eligible outputs are parked in `deferred` and looked at
    /// again on later calls.
    async fn remove_temp_outputs(
        &self,
        graph: &TaskGraph,
        finished: &TaskId,
        cleaned: &mut BTreeSet<TaskId>,
        deferred: &mut BTreeSet<TaskId>,
    ) {
        if self.config.keep_temp_outputs {
            return;
        }
        let mut candidates: Vec<TaskId> = vec![finished.clone()];
        if let Some(task) = graph.task(finished) {
            candidates.extend(task.deps().iter().cloned());
        }
        candidates.extend(std::mem::take(deferred));
        let outstanding = checkpoints_outstanding(graph);

        for id in candidates {
            if cleaned.contains(&id) {
                continue;
            }
            let Some(task) = graph.task(&id) else { continue };
            if task.state() != TaskState::Succeeded || !task.outputs.iter().any(|o| o.temp) {
                continue;
            }
            if task.is_checkpoint() && !graph.is_replanned(&id) {
                continue;
            }
            let mut consumers = graph.dependents(&id).peekable();
            if consumers.peek().is_none() {
                continue;
            }
            let all_done = consumers
                .all(|c| graph.task(c).is_some_and(|t| t.state() == TaskState::Succeeded));
            if !all_done {
                continue;
            }
            if outstanding {
                tracing::debug!(task = %id, "Keeping temp outputs until checkpoints re-plan");
                deferred.insert(id);
                continue;
            }

            for output in task.outputs.iter().filter(|o| o.temp) {
                let path = self.config.resolve(&output.path);
                let removed = if output.directory {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match removed {
                    Ok(()) => {
                        tracing::info!(task = %id, path = %output.path.display(), "Removed temp output");
                        self.events.emit(EngineEvent::TempRemoved {
                            task: id.to_string(),
                            path: output.path.display().to_string(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(task = %id, path = %output.path.display(), error = %e, "Could not remove temp output")
                    }
                }
            }
            cleaned.insert(id);
        }
    }
}

/// Whether some checkpoint could still add tasks to the graph.
fn checkpoints_outstanding(graph: &TaskGraph) -> bool {
    graph.tasks().any(|t| {
        t.is_checkpoint()
            && !graph.is_replanned(&t.id)
            && !matches!(t.state(), TaskState::Failed | TaskState::Skipped)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Workflow;
    use crate::handler::{ActionContext, ActionHandler};
    use async_trait::async_trait;
    use satflow_tools::{ExecResult, Invocation};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes every expected output and tracks peak concurrency.
    #[derive(Default)]
    struct FakeInvoker {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolInvoker for FakeInvoker {
        async fn invoke(&self, inv: &Invocation) -> Result<ExecResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if inv.args.iter().any(|a| a.contains("exit 1")) {
                return Ok(ExecResult {
                    exit_code: 1,
                    timed_out: false,
                    wall_time: Duration::from_millis(1),
                    peak_rss_kb: None,
                    missing_outputs: Vec::new(),
                });
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            for out in &inv.expected_outputs {
                tokio::fs::write(inv.resolve(out), "chr1\t1\t2\n").await?;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecResult {
                exit_code: 0,
                timed_out: false,
                wall_time: Duration::from_millis(30),
                peak_rss_kb: None,
                missing_outputs: Vec::new(),
            })
        }
    }

    fn workflow(dir: &Path, engine: serde_json::Value, rules: serde_json::Value) -> Workflow {
        let mut engine = engine;
        engine["workdir"] = json!(dir);
        Workflow::from_json(&json!({"engine": engine, "rules": rules}).to_string()).unwrap()
    }

    fn fan_rules(threads: u32) -> serde_json::Value {
        json!([
            {"name": "part", "output": ["parts/{i}.txt"], "resources": {"threads": threads},
             "action": {"type": "shell", "command": "make {output}"}},
            {"name": "all", "input": ["parts/1.txt", "parts/2.txt", "parts/3.txt", "parts/4.txt"],
             "output": ["all.txt"], "action": {"type": "merge_sorted"}}
        ])
    }

    #[test]
    fn ledger_acquire_and_release() {
        let mut ledger = ResourceLedger::new(Resources::new(4, 1000));
        assert!(ledger.try_acquire(&Resources::new(3, 600)));
        assert!(!ledger.try_acquire(&Resources::new(2, 100)));
        assert!(!ledger.try_acquire(&Resources::new(1, 500)));
        assert!(ledger.try_acquire(&Resources::new(1, 400)));
        assert_eq!(ledger.free(), Resources::new(0, 0));
        ledger.release(&Resources::new(3, 600));
        ledger.release(&Resources::new(1, 400));
        assert!(ledger.is_idle());
    }

    #[tokio::test]
    async fn runs_fan_in_within_thread_budget() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), json!({"cores": 4}), fan_rules(2));
        let planner = wf.planner();
        let mut graph = planner.plan(&[PathBuf::from("all.txt")]).unwrap();
        assert_eq!(graph.len(), 5);

        let invoker = Arc::new(FakeInvoker::default());
        let summary = Executor::new(planner)
            .with_invoker(invoker.clone())
            .run(&mut graph)
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.succeeded, 5);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 4);
        // two 2-thread tasks fit in 4 cores
        assert_eq!(invoker.peak.load(Ordering::SeqCst), 2);
        let merged = std::fs::read_to_string(dir.path().join("all.txt")).unwrap();
        assert_eq!(merged.lines().count(), 4);
    }

    #[tokio::test]
    async fn job_cap_limits_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), json!({"cores": 8, "jobs": 1}), fan_rules(1));
        let planner = wf.planner();
        let mut graph = planner.plan(&[PathBuf::from("all.txt")]).unwrap();
        let invoker = Arc::new(FakeInvoker::default());
        Executor::new(planner)
            .with_invoker(invoker.clone())
            .run(&mut graph)
            .await
            .unwrap();
        assert_eq!(invoker.peak.load(Ordering::SeqCst), 1);
    }

    fn failing_rules() -> serde_json::Value {
        json!([
            {"name": "ok", "output": ["ok/{s}.txt"], "action": {"type": "shell", "command": "fine"}},
            {"name": "bad", "output": ["bad/{s}.txt"], "action": {"type": "shell", "command": "exit 1"}},
            {"name": "after_bad", "input": ["bad/{s}.txt"], "output": ["after/{s}.txt"],
             "action": {"type": "shell", "command": "fine"}},
            {"name": "final", "input": ["after/{s}.txt"], "output": ["final/{s}.txt"],
             "action": {"type": "shell", "command": "fine"}}
        ])
    }

    #[tokio::test]
    async fn failure_propagates_only_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), json!({"cores": 2}), failing_rules());
        let planner = wf.planner();
        let mut graph = planner
            .plan(&[PathBuf::from("final/x.txt"), PathBuf::from("ok/x.txt")])
            .unwrap();

        let executor = Executor::new(planner).with_invoker(Arc::new(FakeInvoker::default()));
        let mut events = executor.events().subscribe();
        let summary = executor.run(&mut graph).await.unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].task, "bad[s=x]");
        assert_eq!(summary.failures[0].message, "exited with code 1");

        let final_task = graph
            .tasks()
            .find(|t| t.id.rule == "final")
            .unwrap();
        assert_eq!(final_task.state(), TaskState::Failed);
        assert_eq!(final_task.failure().unwrap().upstream.as_ref().unwrap().rule, "bad");

        let mut saw_finish = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::RunFinished { failed, .. } = event {
                assert_eq!(failed, 3);
                saw_finish = true;
            }
        }
        assert!(saw_finish);
    }

    #[tokio::test]
    async fn fail_fast_skips_unstarted_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let rules = json!([
            {"name": "bad", "output": ["bad.txt"], "action": {"type": "shell", "command": "exit 1"}},
            {"name": "first", "output": ["first.txt"], "action": {"type": "shell", "command": "fine"}},
            {"name": "second", "input": ["first.txt"], "output": ["second.txt"],
             "action": {"type": "shell", "command": "fine"}}
        ]);
        let wf = workflow(dir.path(), json!({"cores": 2, "keep_going": false}), rules);
        let planner = wf.planner();
        let mut graph = planner
            .plan(&[PathBuf::from("bad.txt"), PathBuf::from("second.txt")])
            .unwrap();

        let summary = Executor::new(planner)
            .with_invoker(Arc::new(FakeInvoker::default()))
            .run(&mut graph)
            .await
            .unwrap();

        // bad and first start together; second is never dispatched
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        let second = graph.tasks().find(|t| t.id.rule == "second").unwrap();
        assert_eq!(second.state(), TaskState::Skipped);
    }

    #[tokio::test]
    async fn fail_fast_stops_after_failed_input_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let rules = json!([
            {"name": "a_bad", "input": ["empty.txt"], "output": ["a.txt"],
             "action": {"type": "shell", "command": "fine"}},
            {"name": "b_other", "output": ["b.txt"], "action": {"type": "shell", "command": "fine"}}
        ]);
        let wf = workflow(dir.path(), json!({"cores": 4, "keep_going": false}), rules);
        let planner = wf.planner();
        let mut graph = planner
            .plan(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")])
            .unwrap();

        let invoker = Arc::new(FakeInvoker::default());
        let summary = Executor::new(planner)
            .with_invoker(invoker.clone())
            .run(&mut graph)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failures[0].message, "input empty.txt is empty");
        let other = graph.tasks().find(|t| t.id.rule == "b_other").unwrap();
        assert_eq!(other.state(), TaskState::Skipped);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("b.txt").exists());
    }

    struct CrashingShell;

    #[async_trait]
    impl ActionHandler for CrashingShell {
        fn handler_type(&self) -> &str {
            "shell"
        }

        async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ExecResult> {
            panic!("handler crashed on {}", ctx.task.id);
        }
    }

    #[tokio::test]
    async fn panicking_task_is_recorded_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let rules = json!([
            {"name": "crash", "output": ["crash.txt"], "action": {"type": "shell", "command": "x"}},
            {"name": "after", "input": ["crash.txt"], "output": ["after.txt"], "action": {"type": "touch"}},
            {"name": "fine", "output": ["fine.txt"], "action": {"type": "touch"}}
        ]);
        let wf = workflow(dir.path(), json!({"cores": 2}), rules);
        let planner = wf.planner();
        let mut graph = planner
            .plan(&[PathBuf::from("after.txt"), PathBuf::from("fine.txt")])
            .unwrap();

        let mut handlers = default_registry();
        handlers.register(CrashingShell);
        let summary = Executor::new(planner)
            .with_handlers(handlers)
            .run(&mut graph)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].task, "crash");
        assert!(summary.failures[0].message.contains("panicked"), "{}", summary.failures[0].message);
        assert!(graph.tasks().all(|t| t.state().is_terminal()));
    }

    #[tokio::test]
    async fn temp_outputs_removed_after_consumers_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let rules = json!([
            {"name": "count", "output": [{"name": "db", "path": "work/{s}.db", "temp": true}],
             "action": {"type": "shell", "command": "count"}},
            {"name": "dump", "input": ["work/{s}.db"], "output": ["out/{s}.txt"],
             "action": {"type": "shell", "command": "dump"}}
        ]);
        let wf = workflow(dir.path(), json!({"cores": 1}), rules);
        let planner = wf.planner();
        let mut graph = planner.plan(&[PathBuf::from("out/a.txt")]).unwrap();

        let summary = Executor::new(planner)
            .with_invoker(Arc::new(FakeInvoker::default()))
            .run(&mut graph)
            .await
            .unwrap();
        assert!(summary.is_success());
        assert!(!dir.path().join("work/a.db").exists());
        assert!(dir.path().join("out/a.txt").exists());
    }

    #[tokio::test]
    async fn over_budget_graph_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), json!({"cores": 8}), fan_rules(8));
        let mut graph = wf.planner().plan(&[PathBuf::from("all.txt")]).unwrap();

        let mut small = wf.engine.clone();
        small.cores = 2;
        let planner = Planner::new(wf.registry.clone(), wf.store.clone(), small);
        let invoker = Arc::new(FakeInvoker::default());
        let err = Executor::new(planner)
            .with_invoker(invoker.clone())
            .run(&mut graph)
            .await
            .unwrap_err();
        assert!(matches!(err, SatflowError::ResourceExceedsBudget { .. }));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }
}
