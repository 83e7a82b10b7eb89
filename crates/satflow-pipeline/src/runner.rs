//! Task runner: one task execution from scratch directory to benchmark record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use satflow_tools::{read_log_tail, BenchmarkRecord, ExecResult, ToolInvoker};
use satflow_types::{Result, SatflowError};

use crate::config::EngineConfig;
use crate::graph::Task;
use crate::handler::{ActionContext, ActionHandler, HandlerRegistry};
use crate::retry::execute_with_retry;

/// Upper bound on the log excerpt carried by a failure.
const MAX_TAIL_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub exit_code: i32,
    pub wall_time: Duration,
    pub peak_rss_kb: Option<u64>,
    pub attempts: usize,
}

#[derive(Clone)]
pub struct TaskRunner {
    handlers: Arc<HandlerRegistry>,
    invoker: Arc<dyn ToolInvoker>,
    config: Arc<EngineConfig>,
}

impl TaskRunner {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        invoker: Arc<dyn ToolInvoker>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            handlers,
            invoker,
            config,
        }
    }

    /// Run `task` with its rule's retry budget and write its benchmark record.
    pub async fn run(&self, task: &Task) -> Result<TaskReport> {
        let handler_type = task.rule.action.handler_type();
        let handler = self.handlers.get(handler_type).ok_or_else(|| {
            SatflowError::Configuration(format!("no handler registered for action '{handler_type}'"))
        })?;
        let name = task.id.to_string();

        let report = execute_with_retry(
            |attempt| self.attempt(task, handler.as_ref(), attempt),
            task.rule.retries,
            &self.config.backoff,
            &name,
        )
        .await?;

        let record = BenchmarkRecord::new(name, report.wall_time, report.peak_rss_kb);
        if let Err(e) = record.write_tsv(&self.config.resolve(&task.benchmark_path)).await {
            tracing::warn!(task = %task.id, error = %e, "Could not write benchmark record");
        }
        Ok(report)
    }

    async fn attempt(
        &self,
        task: &Task,
        handler: &dyn ActionHandler,
        attempt: usize,
    ) -> Result<TaskReport> {
        if let Err(e) = self.prepare_outputs(task).await {
            return Err(self.failure(task, format!("cannot prepare outputs: {e}")).await);
        }
        let scratch = match self.scratch_dir(task) {
            Ok(dir) => dir,
            Err(e) => return Err(self.failure(task, format!("cannot create scratch directory: {e}")).await),
        };

        let ctx = ActionContext {
            task,
            workdir: &self.config.workdir,
            tmpdir: scratch.path(),
            invoker: self.invoker.as_ref(),
        };
        let outcome = handler.execute(&ctx).await;
        self.release_scratch(task, scratch);

        let exec = match outcome {
            Ok(exec) => exec,
            Err(e) => return Err(self.failure(task, e.to_string()).await),
        };
        self.judge(task, &exec).await?;

        tracing::debug!(
            task = %task.id,
            attempt = attempt + 1,
            wall_ms = exec.wall_time.as_millis() as u64,
            "Task attempt succeeded"
        );
        Ok(TaskReport {
            exit_code: exec.exit_code,
            wall_time: exec.wall_time,
            peak_rss_kb: exec.peak_rss_kb,
            attempts: attempt + 1,
        })
    }

    /// Exit status and output checks.
    async fn judge(&self, task: &Task, exec: &ExecResult) -> Result<()> {
        if exec.timed_out {
            let limit = task.timeout.map(|t| t.as_secs()).unwrap_or_default();
            return Err(self.failure(task, format!("timed out after {limit}s")).await);
        }
        if exec.exit_code != 0 {
            if !task.rule.tolerate_exit_codes.contains(&exec.exit_code) {
                return Err(self
                    .failure(task, format!("exited with code {}", exec.exit_code))
                    .await);
            }
            tracing::warn!(task = %task.id, exit_code = exec.exit_code, "Tolerating nonzero exit");
        }

        // The invoker already checked existence of what it was told to expect.
        let mut problems: Vec<String> = exec
            .missing_outputs
            .iter()
            .map(|p| format!("missing output {}", p.display()))
            .collect();
        for output in &task.outputs {
            if exec.missing_outputs.contains(&output.path) {
                continue;
            }
            let path = self.config.resolve(&output.path);
            match tokio::fs::metadata(&path).await {
                Err(_) => problems.push(format!("missing output {}", output.path.display())),
                Ok(meta) if output.directory && !meta.is_dir() => {
                    problems.push(format!("output {} is not a directory", output.path.display()))
                }
                Ok(meta)
                    if !output.directory
                        && meta.len() == 0
                        && !output.allow_empty
                        && !task.rule.action.may_produce_empty() =>
                {
                    problems.push(format!("empty output {}", output.path.display()))
                }
                Ok(_) => {}
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(self.failure(task, problems.join("; ")).await)
        }
    }

    async fn failure(&self, task: &Task, message: String) -> SatflowError {
        let log_tail = read_log_tail(
            &self.config.resolve(&task.log_path),
            self.config.log_tail_lines,
            MAX_TAIL_CHARS,
        )
        .await;
        SatflowError::TaskExecution {
            task: task.id.to_string(),
            message,
            log_path: Some(task.log_path.clone()),
            log_tail,
        }
    }

    /// Remove stale outputs from earlier runs and create parent directories.
    async fn prepare_outputs(&self, task: &Task) -> std::io::Result<()> {
        for output in &task.outputs {
            let path = self.config.resolve(&output.path);
            match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await?,
                Ok(_) => tokio::fs::remove_file(&path).await?,
                Err(_) => {}
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    fn scratch_dir(&self, task: &Task) -> std::io::Result<tempfile::TempDir> {
        let root: PathBuf = match &self.config.tmp_root {
            Some(root) => self.config.resolve(root),
            None => std::env::temp_dir(),
        };
        std::fs::create_dir_all(&root)?;
        tempfile::Builder::new()
            .prefix(&format!("satflow-{}-", task.id.rule))
            .tempdir_in(&root)
    }

    fn release_scratch(&self, task: &Task, scratch: tempfile::TempDir) {
        if task.rule.keep_tmp || self.config.keep_tmp {
            let kept = scratch.keep();
            tracing::info!(task = %task.id, path = %kept.display(), "Keeping scratch directory");
            return;
        }
        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!(task = %task.id, path = %path.display(), error = %e, "Could not remove scratch directory");
        }
    }
}

/// Why `task` may not start yet, judged from its inputs on disk. `permit_empty`
/// says whether a zero-length input file is acceptable.
pub(crate) fn input_problem(
    config: &EngineConfig,
    task: &Task,
    permit_empty: impl Fn(&Path) -> bool,
) -> Option<String> {
    for path in task.input_paths() {
        match std::fs::metadata(config.resolve(path)) {
            Err(_) => return Some(format!("input {} does not exist", path.display())),
            Ok(meta) if meta.is_file() && meta.len() == 0 && !permit_empty(path) => {
                return Some(format!("input {} is empty", path.display()))
            }
            Ok(_) => {}
        }
    }
    None
}
