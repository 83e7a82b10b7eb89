use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use satflow_types::SatflowError;

use crate::environment::{ExecResult, Invocation, ToolInvoker};

/// Grace period between SIGTERM and SIGKILL after a timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Invokes tools as local subprocesses.
#[derive(Debug, Default, Clone)]
pub struct LocalInvoker;

impl LocalInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolInvoker for LocalInvoker {
    async fn invoke(&self, inv: &Invocation) -> satflow_types::Result<ExecResult> {
        let log_path = inv.resolve(&inv.log_path);
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let log = std::fs::File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = std::process::Command::new(&inv.program);
        cmd.args(&inv.args)
            .current_dir(&inv.cwd)
            .envs(&inv.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group so a timeout can take down the whole pipeline of children
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        tracing::debug!(program = %inv.program, args = ?inv.args, cwd = %inv.cwd.display(), "Spawning tool");

        let start = Instant::now();
        let child = cmd.spawn()?;
        let pid = child.id();
        let mut waiter = tokio::task::spawn_blocking(move || wait_child(child));

        let (status, timed_out) = match inv.timeout {
            None => (join_waiter(&mut waiter).await?, false),
            Some(limit) => {
                tokio::select! {
                    status = join_waiter(&mut waiter) => (status?, false),
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!(pid, timeout_ms = limit.as_millis() as u64, "Tool timed out, terminating");
                        signal_group(pid, Signal::Term);
                        let status = tokio::select! {
                            status = join_waiter(&mut waiter) => status?,
                            _ = tokio::time::sleep(KILL_GRACE) => {
                                signal_group(pid, Signal::Kill);
                                join_waiter(&mut waiter).await?
                            }
                        };
                        (status, true)
                    }
                }
            }
        };

        let missing_outputs = inv
            .expected_outputs
            .iter()
            .filter(|p| !inv.resolve(p).exists())
            .cloned()
            .collect::<Vec<_>>();

        let result = ExecResult {
            exit_code: status.exit_code,
            timed_out,
            wall_time: start.elapsed(),
            peak_rss_kb: status.peak_rss_kb,
            missing_outputs,
        };

        tracing::info!(
            program = %inv.program,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            wall_ms = result.wall_time.as_millis() as u64,
            missing = result.missing_outputs.len(),
            "Tool completed"
        );

        Ok(result)
    }
}

struct ChildStatus {
    exit_code: i32,
    peak_rss_kb: Option<u64>,
}

async fn join_waiter(
    waiter: &mut tokio::task::JoinHandle<std::io::Result<ChildStatus>>,
) -> satflow_types::Result<ChildStatus> {
    let joined = waiter
        .await
        .map_err(|e| SatflowError::Other(format!("Tool wait task aborted: {}", e)))?;
    Ok(joined?)
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(-(pid as i32), sig);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

/// Reap the child with `wait4` so its rusage (peak RSS) comes back with the status.
#[cfg(unix)]
fn wait_child(child: std::process::Child) -> std::io::Result<ChildStatus> {
    let pid = child.id() as libc::pid_t;
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc != -1 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    // Already reaped; dropping the handle does not wait again.
    drop(child);

    let exit_code = if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        -1
    };

    // ru_maxrss is bytes on macOS, KiB elsewhere
    let max_rss = usage.ru_maxrss.max(0) as u64;
    let peak_rss_kb = if cfg!(target_os = "macos") {
        max_rss / 1024
    } else {
        max_rss
    };

    Ok(ChildStatus {
        exit_code,
        peak_rss_kb: Some(peak_rss_kb),
    })
}

#[cfg(not(unix))]
fn wait_child(mut child: std::process::Child) -> std::io::Result<ChildStatus> {
    let status = child.wait()?;
    Ok(ChildStatus {
        exit_code: status.code().unwrap_or(-1),
        peak_rss_kb: None,
    })
}
