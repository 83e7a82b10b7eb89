//! Built-in action handlers.

pub mod merge;
pub mod shell;

pub use merge::MergeSortedHandler;
pub use shell::ShellHandler;

use std::time::Instant;

use async_trait::async_trait;

use satflow_tools::ExecResult;
use satflow_types::Result;

use crate::handler::{ActionContext, ActionHandler};

// ---------------------------------------------------------------------------
// TouchHandler: creates every output without running anything
// ---------------------------------------------------------------------------

pub struct TouchHandler;

#[async_trait]
impl ActionHandler for TouchHandler {
    fn handler_type(&self) -> &str {
        "touch"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ExecResult> {
        let start = Instant::now();
        for output in &ctx.task.outputs {
            let path = ctx.resolve(&output.path);
            if output.directory {
                tokio::fs::create_dir_all(&path).await?;
            } else {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
            }
        }
        tracing::debug!(task = %ctx.task.id, outputs = ctx.task.outputs.len(), "Touched outputs");
        Ok(ExecResult {
            exit_code: 0,
            timed_out: false,
            wall_time: start.elapsed(),
            peak_rss_kb: None,
            missing_outputs: Vec::new(),
        })
    }
}
