//! Process invocation contract for satflow tasks.
//!
//! Provides the `ToolInvoker` trait, the `LocalInvoker` subprocess
//! implementation, per-task benchmark records, and log-tail helpers used in
//! failure reports.

pub mod benchmark;
pub mod environment;
pub mod local_env;
pub mod truncation;

pub use benchmark::{BenchmarkRecord, BENCHMARK_HEADER};
pub use environment::{ExecResult, Invocation, ToolInvoker};
pub use local_env::LocalInvoker;
pub use truncation::{read_log_tail, tail_lines, truncate_output};
