use async_trait::async_trait;

use satflow_tools::{ExecResult, Invocation};
use satflow_types::{Result, SatflowError};

use crate::handler::{ActionContext, ActionHandler};
use crate::rule::ActionSpec;
use crate::template::render_command;

// ---------------------------------------------------------------------------
// ShellHandler: renders the command template and runs it through the invoker
// ---------------------------------------------------------------------------

pub struct ShellHandler;

#[async_trait]
impl ActionHandler for ShellHandler {
    fn handler_type(&self) -> &str {
        "shell"
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ExecResult> {
        let task = ctx.task;
        let ActionSpec::Shell { command } = &task.rule.action else {
            return Err(SatflowError::Other(format!(
                "shell handler dispatched for non-shell action of {}",
                task.id
            )));
        };
        let rendered = render_command(command, task, ctx.tmpdir)?;

        tracing::info!(task = %task.id, command = %rendered, "Executing shell command");

        let invocation = Invocation::shell(&rendered, ctx.workdir, &task.log_path)
            .timeout(task.timeout)
            .env("TMPDIR", ctx.tmpdir.to_string_lossy())
            .env("SATFLOW_THREADS", task.resources.threads.to_string())
            .expect_outputs(task.output_paths().cloned());

        ctx.invoker.invoke(&invocation).await
    }
}
