//! Engine configuration and workflow-file loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use satflow_types::{Resources, Result, SatflowError};

use crate::planner::Planner;
use crate::retry::BackoffPolicy;
use crate::rule::{RuleDecl, RuleRegistry, RuleSpec};
use crate::wildcard::{Binding, Pattern};

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Process-wide settings handed to the planner and executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root that every relative task path is resolved against.
    pub workdir: PathBuf,
    pub log_dir: PathBuf,
    pub benchmark_dir: PathBuf,
    /// Parent for per-task scratch directories; system temp when unset.
    pub tmp_root: Option<PathBuf>,
    /// Total thread budget.
    pub cores: u32,
    /// Maximum concurrently running tasks; `cores` when unset.
    pub jobs: Option<usize>,
    /// Total memory budget in MiB; unbounded when unset.
    pub mem_mb: Option<u64>,
    /// Continue independent branches after a task failure.
    pub keep_going: bool,
    /// Keep every task's scratch directory.
    pub keep_tmp: bool,
    /// Never delete outputs flagged `temp`.
    pub keep_temp_outputs: bool,
    pub default_timeout_secs: Option<u64>,
    pub log_tail_lines: usize,
    /// Placeholder naming the sample whose config map parameters come from.
    pub sample_wildcard: String,
    /// Delay between retries of a rule with `retries` set.
    pub backoff: BackoffPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            log_dir: PathBuf::from("logs"),
            benchmark_dir: PathBuf::from("benchmarks"),
            tmp_root: None,
            cores: available_cores(),
            jobs: None,
            mem_mb: None,
            keep_going: true,
            keep_tmp: false,
            keep_temp_outputs: false,
            default_timeout_secs: None,
            log_tail_lines: 20,
            sample_wildcard: "sample".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

fn available_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

impl EngineConfig {
    pub fn budget(&self) -> Resources {
        Resources::new(self.cores.max(1), self.mem_mb.unwrap_or(u64::MAX))
    }

    pub fn max_jobs(&self) -> usize {
        self.jobs.unwrap_or(self.cores as usize).max(1)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// `path` under `workdir` unless already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// Per-sample configuration maps plus workflow-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    global: Map<String, Value>,
    samples: BTreeMap<String, Map<String, Value>>,
    sample_wildcard: String,
}

impl ConfigStore {
    pub fn new(
        global: Map<String, Value>,
        samples: BTreeMap<String, Map<String, Value>>,
        sample_wildcard: impl Into<String>,
    ) -> Self {
        Self {
            global,
            samples,
            sample_wildcard: sample_wildcard.into(),
        }
    }

    /// Sample-specific value first, then the workflow-wide one.
    pub fn lookup(&self, binding: &Binding, key: &str) -> Option<&Value> {
        binding
            .get(&self.sample_wildcard)
            .and_then(|s| self.samples.get(s))
            .and_then(|m| m.get(key))
            .or_else(|| self.global.get(key))
    }

    pub(crate) fn describe_scope(&self, binding: &Binding) -> String {
        match binding.get(&self.sample_wildcard) {
            Some(s) if self.samples.contains_key(s) => format!("sample '{s}'"),
            Some(s) => format!("unknown sample '{s}'"),
            None => "no sample bound".to_string(),
        }
    }

    pub fn sample_names(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    pub fn sample(&self, name: &str) -> Option<&Map<String, Value>> {
        self.samples.get(name)
    }

    pub fn has_sample(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    pub fn sample_wildcard(&self) -> &str {
        &self.sample_wildcard
    }
}

// ---------------------------------------------------------------------------
// Workflow file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct WorkflowFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    config: Map<String, Value>,
    #[serde(default)]
    samples: BTreeMap<String, Map<String, Value>>,
    rules: Vec<RuleDecl>,
    #[serde(default)]
    targets: Vec<String>,
}

/// A loaded workflow: compiled rules, sample configuration, target templates.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub engine: EngineConfig,
    pub store: Arc<ConfigStore>,
    pub registry: Arc<RuleRegistry>,
    pub targets: Vec<Pattern>,
}

impl Workflow {
    pub fn from_json(json: &str) -> Result<Self> {
        let file: WorkflowFile = serde_json::from_str(json)?;
        let mut registry = RuleRegistry::new();
        for decl in file.rules {
            registry.register(RuleSpec::from_decl(decl)?)?;
        }
        let targets = file
            .targets
            .iter()
            .map(|t| Pattern::parse(t))
            .collect::<Result<Vec<_>>>()?;
        let store = ConfigStore::new(file.config, file.samples, file.engine.sample_wildcard.clone());
        Ok(Self {
            engine: file.engine,
            store: Arc::new(store),
            registry: Arc::new(registry),
            targets,
        })
    }

    /// Load a workflow file. A relative `workdir` is taken relative to the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SatflowError::Configuration(format!("cannot read workflow {}: {e}", path.display()))
        })?;
        let mut wf = Self::from_json(&text)?;
        if wf.engine.workdir.is_relative() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                wf.engine.workdir = parent.join(&wf.engine.workdir);
            }
        }
        tracing::debug!(
            path = %path.display(),
            rules = wf.registry.len(),
            samples = wf.store.sample_names().count(),
            "Workflow loaded"
        );
        Ok(wf)
    }

    /// Concrete target paths for a selection of sample names; empty or `all`
    /// selects every sample.
    pub fn select_targets(&self, selection: &[String]) -> Result<Vec<PathBuf>> {
        let samples: Vec<String> = if selection.is_empty() || selection.iter().any(|s| s == "all") {
            self.store.sample_names().map(String::from).collect()
        } else {
            for s in selection {
                if !self.store.has_sample(s) {
                    return Err(SatflowError::Configuration(format!("unknown sample '{s}'")));
                }
            }
            selection.to_vec()
        };

        let mut paths = Vec::new();
        for target in &self.targets {
            if !target.has_placeholders() {
                if !paths.contains(&PathBuf::from(target.as_str())) {
                    paths.push(PathBuf::from(target.as_str()));
                }
                continue;
            }
            for sample in &samples {
                let binding = Binding::new().with(self.store.sample_wildcard(), sample.as_str());
                let path = PathBuf::from(target.instantiate(&binding)?);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    pub fn planner(&self) -> Planner {
        Planner::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            self.engine.clone(),
        )
    }
}
