//! Rule definitions and the rule registry.
//!
//! A [`RuleSpec`] is the immutable, compiled form of one rule declaration.
//! Declarations arrive as JSON ([`RuleDecl`]) and are compiled once; every
//! path template becomes a [`Pattern`]. The [`RuleRegistry`] answers the one
//! question the planner asks: which rule produces this path?

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use satflow_types::{Resources, Result, SatflowError};

use crate::config::ConfigStore;
use crate::wildcard::{Binding, Pattern};

// ---------------------------------------------------------------------------
// Declarations (serde surface)
// ---------------------------------------------------------------------------

/// A parameter or resource value: a literal, or a key looked up in the
/// sample's configuration map at instantiation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Config {
        config: String,
        #[serde(default)]
        default: Option<Value>,
    },
    Literal(Value),
}

impl ParamValue {
    /// Resolve under `binding`. String literals are path-style templates and
    /// have their placeholders substituted.
    pub fn resolve(&self, binding: &Binding, store: &ConfigStore) -> Result<Value> {
        match self {
            ParamValue::Literal(Value::String(s)) => {
                Ok(Value::String(Pattern::parse(s)?.instantiate(binding)?))
            }
            ParamValue::Literal(v) => Ok(v.clone()),
            ParamValue::Config { config, default } => match store.lookup(binding, config) {
                Some(v) => Ok(v.clone()),
                None => default.clone().ok_or_else(|| {
                    SatflowError::Configuration(format!(
                        "no value for config key '{}' ({}) and no default",
                        config,
                        store.describe_scope(binding)
                    ))
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDecl {
    pub checkpoint: String,
    pub targets: OneOrMany,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDecl {
    Path(String),
    Aggregate { name: String, aggregate: AggregateDecl },
    Named { name: String, path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputDecl {
    Path(String),
    Named {
        name: String,
        path: String,
        #[serde(default)]
        temp: bool,
        #[serde(default)]
        directory: bool,
        #[serde(default)]
        allow_empty: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    #[serde(default = "default_threads")]
    pub threads: ParamValue,
    #[serde(default = "default_mem")]
    pub mem_mb: ParamValue,
}

fn default_threads() -> ParamValue {
    ParamValue::Literal(Value::from(1))
}

fn default_mem() -> ParamValue {
    ParamValue::Literal(Value::from(0))
}

impl Default for ResourceDecl {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            mem_mb: default_mem(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDecl {
    /// Discovery pattern, relative to the checkpoint's directory output.
    pub pattern: String,
}

/// Record ordering used by the built-in merge action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Column 1 lexicographic, then column 2 numeric (interval files).
    #[default]
    NameStart,
    /// Column 1 lexicographic only.
    Name,
}

/// What a task does once its inputs are in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// A command template run under `bash -c`.
    Shell { command: String },
    /// Concatenate inputs and sort the lines into the first output.
    MergeSorted {
        #[serde(default)]
        input: Option<String>,
        #[serde(default)]
        key: SortKey,
    },
    /// Create every output (empty file, or directory).
    Touch,
}

impl ActionSpec {
    pub fn handler_type(&self) -> &'static str {
        match self {
            ActionSpec::Shell { .. } => "shell",
            ActionSpec::MergeSorted { .. } => "merge_sorted",
            ActionSpec::Touch => "touch",
        }
    }

    /// Built-in actions legitimately write empty files: a merge over zero
    /// inputs, or a touched sentinel.
    pub fn may_produce_empty(&self) -> bool {
        !matches!(self, ActionSpec::Shell { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecl {
    pub name: String,
    #[serde(default)]
    pub input: Vec<InputDecl>,
    pub output: Vec<OutputDecl>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub resources: ResourceDecl,
    #[serde(default)]
    pub checkpoint: Option<CheckpointDecl>,
    pub action: ActionSpec,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default)]
    pub retries: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub tolerate_exit_codes: Vec<i32>,
    #[serde(default)]
    pub keep_tmp: bool,
}

// ---------------------------------------------------------------------------
// Compiled rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum InputKind {
    Path(Pattern),
    /// Every `targets` path for every entry the checkpoint discovers.
    Aggregate { checkpoint: String, targets: Vec<Pattern> },
}

#[derive(Debug, Clone)]
pub struct InputSpec {
    pub name: String,
    pub kind: InputKind,
}

#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub pattern: Pattern,
    pub temp: bool,
    pub directory: bool,
    pub allow_empty: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub threads: ParamValue,
    pub mem_mb: ParamValue,
}

impl ResourceSpec {
    pub fn resolve(&self, binding: &Binding, store: &ConfigStore) -> Result<Resources> {
        let threads = as_u64(&self.threads.resolve(binding, store)?, "threads")?;
        let mem_mb = as_u64(&self.mem_mb.resolve(binding, store)?, "mem_mb")?;
        to_resources(threads, mem_mb)
    }

    /// The requirement when both values are numeric literals.
    pub fn literal(&self) -> Result<Option<Resources>> {
        match (&self.threads, &self.mem_mb) {
            (ParamValue::Literal(t @ Value::Number(_)), ParamValue::Literal(m @ Value::Number(_))) => {
                let threads = as_u64(t, "threads")?;
                let mem_mb = as_u64(m, "mem_mb")?;
                to_resources(threads, mem_mb).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn to_resources(threads: u64, mem_mb: u64) -> Result<Resources> {
    let threads = u32::try_from(threads)
        .map_err(|_| SatflowError::Configuration(format!("threads out of range: {threads}")))?;
    Ok(Resources::new(threads.max(1), mem_mb))
}

fn check_unique<'a>(rule: &str, what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for n in names {
        if !seen.insert(n) {
            return Err(SatflowError::Configuration(format!(
                "rule '{rule}' uses the {what} name '{n}' more than once"
            )));
        }
    }
    Ok(())
}

fn as_u64(value: &Value, what: &str) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| SatflowError::Configuration(format!("{what} must be a non-negative integer, got {value}")))
}

/// One compiled rule. Shared read-only by every task instantiated from it.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub name: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub params: BTreeMap<String, ParamValue>,
    pub resources: ResourceSpec,
    /// Consumer-side discovery pattern; `Some` marks a checkpoint rule.
    pub checkpoint: Option<Pattern>,
    pub action: ActionSpec,
    pub log: Option<Pattern>,
    pub benchmark: Option<Pattern>,
    pub retries: usize,
    pub timeout: Option<Duration>,
    pub tolerate_exit_codes: Vec<i32>,
    pub keep_tmp: bool,
}

impl RuleSpec {
    pub fn is_checkpoint(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// The directory output a checkpoint rule discovers into.
    pub fn checkpoint_directory(&self) -> Option<&OutputSpec> {
        self.checkpoint.as_ref()?;
        self.outputs.iter().find(|o| o.directory)
    }

    /// Binding derived from the first output pattern that matches `path`.
    pub fn match_output(&self, path: &str) -> Option<Binding> {
        self.outputs.iter().find_map(|o| o.pattern.matches(path))
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Placeholders every output must bind.
    pub fn required_placeholders(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for input in &self.inputs {
            if let InputKind::Path(p) = &input.kind {
                names.extend(p.placeholders());
            }
        }
        for o in &self.outputs {
            names.extend(o.pattern.placeholders());
        }
        for p in self.log.iter().chain(self.benchmark.iter()) {
            names.extend(p.placeholders());
        }
        names
    }

    pub fn from_decl(decl: RuleDecl) -> Result<Self> {
        let name = decl.name;
        if name.trim().is_empty() {
            return Err(SatflowError::Configuration("rule with empty name".into()));
        }
        if decl.output.is_empty() {
            return Err(SatflowError::Configuration(format!(
                "rule '{name}' declares no outputs"
            )));
        }

        let mut inputs = Vec::with_capacity(decl.input.len());
        for (i, input) in decl.input.into_iter().enumerate() {
            inputs.push(match input {
                InputDecl::Path(path) => InputSpec {
                    name: i.to_string(),
                    kind: InputKind::Path(Pattern::parse(&path)?),
                },
                InputDecl::Named { name, path } => InputSpec {
                    name,
                    kind: InputKind::Path(Pattern::parse(&path)?),
                },
                InputDecl::Aggregate { name, aggregate } => InputSpec {
                    name,
                    kind: InputKind::Aggregate {
                        checkpoint: aggregate.checkpoint,
                        targets: aggregate
                            .targets
                            .into_vec()
                            .iter()
                            .map(|t| Pattern::parse(t))
                            .collect::<Result<_>>()?,
                    },
                },
            });
        }

        let mut outputs = Vec::with_capacity(decl.output.len());
        for (i, output) in decl.output.into_iter().enumerate() {
            outputs.push(match output {
                OutputDecl::Path(path) => OutputSpec {
                    name: i.to_string(),
                    pattern: Pattern::parse(&path)?,
                    temp: false,
                    directory: false,
                    allow_empty: false,
                },
                OutputDecl::Named {
                    name,
                    path,
                    temp,
                    directory,
                    allow_empty,
                } => OutputSpec {
                    name,
                    pattern: Pattern::parse(&path)?,
                    temp,
                    directory,
                    allow_empty,
                },
            });
        }

        // Inputs and outputs are separate namespaces (`{input.x}` vs `{output.x}`).
        check_unique(&name, "input", inputs.iter().map(|i| i.name.as_str()))?;
        check_unique(&name, "output", outputs.iter().map(|o| o.name.as_str()))?;

        let resources = ResourceSpec {
            threads: decl.resources.threads,
            mem_mb: decl.resources.mem_mb,
        };
        resources.literal().map_err(|e| match e {
            SatflowError::Configuration(msg) => {
                SatflowError::Configuration(format!("rule '{name}': {msg}"))
            }
            other => other,
        })?;

        Ok(Self {
            name,
            inputs,
            outputs,
            params: decl.params,
            resources,
            checkpoint: decl
                .checkpoint
                .map(|c| Pattern::parse(&c.pattern))
                .transpose()?,
            action: decl.action,
            log: decl.log.as_deref().map(Pattern::parse).transpose()?,
            benchmark: decl.benchmark.as_deref().map(Pattern::parse).transpose()?,
            retries: decl.retries,
            timeout: decl.timeout_secs.map(Duration::from_secs),
            tolerate_exit_codes: decl.tolerate_exit_codes,
            keep_tmp: decl.keep_tmp,
        })
    }
}

// ---------------------------------------------------------------------------
// RuleRegistry
// ---------------------------------------------------------------------------

/// Registered rules, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<RuleSpec>>,
    by_name: BTreeMap<String, usize>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: RuleSpec) -> Result<()> {
        if self.by_name.contains_key(&rule.name) {
            return Err(SatflowError::DuplicateRule(rule.name));
        }
        self.by_name.insert(rule.name.clone(), self.rules.len());
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RuleSpec>> {
        self.by_name.get(name).map(|&i| &self.rules[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RuleSpec>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The unique rule whose output patterns match `path`, with the binding
    /// the match produced.
    pub fn lookup_by_output_pattern(&self, path: &str) -> Result<Option<(Arc<RuleSpec>, Binding)>> {
        let mut found: Vec<(Arc<RuleSpec>, Binding)> = self
            .rules
            .iter()
            .filter_map(|r| r.match_output(path).map(|b| (Arc::clone(r), b)))
            .collect();
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(SatflowError::AmbiguousProducer {
                path: path.to_string(),
                rules: found.iter().map(|(r, _)| r.name.clone()).collect(),
            }),
        }
    }
}
