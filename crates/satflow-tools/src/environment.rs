use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

/// One blocking invocation of an external tool.
///
/// stdout and stderr are both redirected to `log_path`; the invocation is
/// successful only when the process exits with code zero and every path in
/// `expected_outputs` exists afterwards.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub log_path: PathBuf,
    pub timeout: Option<Duration>,
    pub expected_outputs: Vec<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: HashMap::new(),
            log_path: log_path.into(),
            timeout: None,
            expected_outputs: Vec::new(),
        }
    }

    /// Run `command` under `bash` in strict mode.
    pub fn shell(command: &str, cwd: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self::new("bash", cwd, log_path)
            .arg("-c")
            .arg(format!("set -euo pipefail; {command}"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn expect_outputs(mut self, outputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.expected_outputs.extend(outputs);
        self
    }

    /// Resolve a possibly relative path against the invocation's working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub timed_out: bool,
    pub wall_time: Duration,
    /// Peak resident set size in KiB, when the platform reports it.
    pub peak_rss_kb: Option<u64>,
    /// Entries of `expected_outputs` absent after the process exited.
    pub missing_outputs: Vec<PathBuf>,
}

/// Capability boundary between the engine and any external tool.
///
/// The engine never knows what a tool computes; it only hands over an
/// [`Invocation`] and inspects the [`ExecResult`].
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> satflow_types::Result<ExecResult>;
}
