//! Per-task benchmark records.
//!
//! One record is written per task as a two-line tab-separated file: a header
//! and a single row of task name, wall-clock seconds and peak memory in MiB
//! (`NA` when the platform does not report it).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const BENCHMARK_HEADER: &str = "task\ts\tmax_rss_mb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub task: String,
    pub wall_secs: f64,
    pub peak_rss_mb: Option<f64>,
}

impl BenchmarkRecord {
    pub fn new(task: impl Into<String>, wall_time: Duration, peak_rss_kb: Option<u64>) -> Self {
        Self {
            task: task.into(),
            wall_secs: wall_time.as_secs_f64(),
            peak_rss_mb: peak_rss_kb.map(|kb| kb as f64 / 1024.0),
        }
    }

    pub fn to_tsv_row(&self) -> String {
        let mem = self
            .peak_rss_mb
            .map(|mb| format!("{:.2}", mb))
            .unwrap_or_else(|| "NA".to_string());
        format!("{}\t{:.4}\t{}", self.task, self.wall_secs, mem)
    }

    pub async fn write_tsv(&self, path: &Path) -> satflow_types::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = format!("{}\n{}\n", BENCHMARK_HEADER, self.to_tsv_row());
        tokio::fs::write(path, content).await?;
        tracing::debug!(path = %path.display(), task = %self.task, "Benchmark written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_formats_memory_in_mib() {
        let rec = BenchmarkRecord::new("kmc[sample=S1]", Duration::from_millis(1500), Some(2048));
        assert_eq!(rec.to_tsv_row(), "kmc[sample=S1]\t1.5000\t2.00");
    }

    #[test]
    fn row_without_memory_uses_na() {
        let rec = BenchmarkRecord::new("merge", Duration::from_secs(2), None);
        assert_eq!(rec.to_tsv_row(), "merge\t2.0000\tNA");
    }

    #[tokio::test]
    async fn write_tsv_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench/kmc/S1.tsv");
        let rec = BenchmarkRecord::new("kmc", Duration::from_secs(1), Some(1024));
        rec.write_tsv(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], BENCHMARK_HEADER);
        assert_eq!(lines[1], "kmc\t1.0000\t1.00");
    }
}
