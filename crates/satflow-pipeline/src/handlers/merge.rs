use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;

use satflow_tools::ExecResult;
use satflow_types::{Result, SatflowError};

use crate::handler::{ActionContext, ActionHandler};
use crate::rule::{ActionSpec, SortKey};

// ---------------------------------------------------------------------------
// MergeSortedHandler: concatenate then sort tab-separated records
// ---------------------------------------------------------------------------

/// Concatenates the task's inputs (or one named input) and writes the sorted
/// lines to the first output. An empty input set produces an empty file.
pub struct MergeSortedHandler;

#[async_trait]
impl ActionHandler for MergeSortedHandler {
    fn handler_type(&self) -> &str {
        "merge_sorted"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ExecResult> {
        let task = ctx.task;
        let ActionSpec::MergeSorted { input, key } = &task.rule.action else {
            return Err(SatflowError::Other(format!(
                "merge handler dispatched for another action of {}",
                task.id
            )));
        };
        let sources: Vec<PathBuf> = match input {
            Some(name) => task
                .input(name)
                .ok_or_else(|| {
                    SatflowError::Configuration(format!("{} has no input named '{name}'", task.id))
                })?
                .paths
                .clone(),
            None => task.input_paths().cloned().collect(),
        };
        let output = task
            .outputs
            .first()
            .ok_or_else(|| SatflowError::Configuration(format!("{} has no output", task.id)))?;

        let start = Instant::now();
        let mut lines = Vec::new();
        for source in &sources {
            let text = tokio::fs::read_to_string(ctx.resolve(source)).await?;
            lines.extend(text.lines().filter(|l| !l.is_empty()).map(String::from));
        }
        let key = *key;
        let lines = tokio::task::spawn_blocking(move || sort_records(lines, key))
            .await
            .map_err(|e| SatflowError::Other(format!("merge sort task aborted: {e}")))?;

        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        tokio::fs::write(ctx.resolve(&output.path), content).await?;

        let log = format!(
            "merged {} records from {} files into {}\n",
            lines.len(),
            sources.len(),
            output.path.display()
        );
        let log_path = ctx.resolve(&task.log_path);
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&log_path, log).await?;

        tracing::debug!(
            task = %task.id,
            files = sources.len(),
            records = lines.len(),
            "Merged sorted records"
        );
        Ok(ExecResult {
            exit_code: 0,
            timed_out: false,
            wall_time: start.elapsed(),
            peak_rss_kb: None,
            missing_outputs: Vec::new(),
        })
    }
}

/// Sort tab-separated records by sequence name, then (for `NameStart`) by
/// numeric start. Remaining ties fall back to the whole line.
pub fn sort_records(mut lines: Vec<String>, key: SortKey) -> Vec<String> {
    lines.sort_by(|a, b| compare(a, b, key).then_with(|| a.cmp(b)));
    lines
}

fn compare(a: &str, b: &str, key: SortKey) -> Ordering {
    let mut fa = a.split('\t');
    let mut fb = b.split('\t');
    let by_name = fa.next().cmp(&fb.next());
    match key {
        SortKey::Name => by_name,
        SortKey::NameStart => by_name.then_with(|| {
            let sa = fa.next().and_then(|s| s.trim().parse::<u64>().ok());
            let sb = fb.next().and_then(|s| s.trim().parse::<u64>().ok());
            sa.cmp(&sb)
        }),
    }
}
