//! Workflow validation: lint rules and diagnostics.
//!
//! Lints inspect a loaded [`Workflow`] against an [`EngineConfig`] without
//! planning or touching the filesystem. Call [`validate`] for advisory
//! diagnostics or [`validate_or_raise`] to fail on any `Error`-severity issue.
//! Duplicate rule names never reach this point: the registry rejects them
//! while the workflow is loaded.

use std::collections::{BTreeSet, VecDeque};

use serde_json::Value;

use satflow_types::{Result, SatflowError};

use crate::config::{EngineConfig, Workflow};
use crate::rule::{ActionSpec, InputKind, ParamValue, RuleSpec};
use crate::template::template_keys;
use crate::wildcard::{Binding, Pattern};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub lint: String,
    pub severity: Severity,
    pub message: String,
    pub rule_name: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

impl Diagnostic {
    fn new(lint: &str, severity: Severity, rule: Option<&str>, message: String) -> Self {
        Self {
            lint: lint.into(),
            severity,
            message,
            rule_name: rule.map(String::from),
            fix: None,
        }
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, workflow: &Workflow, config: &EngineConfig) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every parameter-like value of a rule: params plus resource requests.
fn param_values(rule: &RuleSpec) -> impl Iterator<Item = (&str, &ParamValue)> {
    rule.params
        .iter()
        .map(|(k, v)| (k.as_str(), v))
        .chain([
            ("resources.threads", &rule.resources.threads),
            ("resources.mem_mb", &rule.resources.mem_mb),
        ])
}

/// Value filled into unbound placeholders when tracing reachability.
const PLACEHOLDER_VALUE: &str = "0";

fn placeholder_binding(pattern: &Pattern, base: &Binding) -> Binding {
    let mut binding = base.clone();
    for name in pattern.placeholders() {
        if !binding.contains(name) {
            binding.insert(name, PLACEHOLDER_VALUE);
        }
    }
    binding
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Outputs must bind every placeholder the rule uses elsewhere, otherwise a
/// task reached through that output cannot be instantiated.
struct OutputPlaceholdersRule;
impl LintRule for OutputPlaceholdersRule {
    fn name(&self) -> &str {
        "output_placeholders"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for rule in workflow.registry.iter() {
            let mut required: BTreeSet<String> = rule
                .required_placeholders()
                .into_iter()
                .map(String::from)
                .collect();
            for (_, value) in param_values(rule) {
                if let ParamValue::Literal(Value::String(s)) = value {
                    if let Ok(p) = Pattern::parse(s) {
                        required.extend(p.placeholders().into_iter().map(String::from));
                    }
                }
            }
            for output in &rule.outputs {
                let missing: Vec<&str> = required
                    .iter()
                    .map(String::as_str)
                    .filter(|name| !output.pattern.placeholders().contains(name))
                    .collect();
                if !missing.is_empty() {
                    diags.push(
                        Diagnostic::new(
                            self.name(),
                            Severity::Error,
                            Some(&rule.name),
                            format!(
                                "Output '{}' of rule '{}' does not bind {{{}}}",
                                output.pattern,
                                rule.name,
                                missing.join("}, {")
                            ),
                        )
                        .with_fix("Add the placeholder to the output path"),
                    );
                }
            }
        }
        diags
    }
}

struct CheckpointDirectoryRule;
impl LintRule for CheckpointDirectoryRule {
    fn name(&self) -> &str {
        "checkpoint_directory"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        workflow
            .registry
            .iter()
            .filter(|r| r.is_checkpoint())
            .filter_map(|rule| {
                let dirs = rule.outputs.iter().filter(|o| o.directory).count();
                (dirs != 1).then(|| {
                    Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!(
                            "Checkpoint rule '{}' declares {dirs} directory outputs; expected exactly one",
                            rule.name
                        ),
                    )
                    .with_fix("Mark the discovery directory output with \"directory\": true")
                })
            })
            .collect()
    }
}

struct AggregateSourceRule;
impl LintRule for AggregateSourceRule {
    fn name(&self) -> &str {
        "aggregate_source"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for rule in workflow.registry.iter() {
            let consumer: BTreeSet<&str> = rule
                .outputs
                .iter()
                .flat_map(|o| o.pattern.placeholders())
                .collect();
            for input in &rule.inputs {
                let InputKind::Aggregate { checkpoint, targets } = &input.kind else {
                    continue;
                };
                let source = workflow.registry.get(checkpoint);
                let Some((dir, pattern)) = source.and_then(|c| {
                    c.checkpoint_directory().zip(c.checkpoint.as_ref())
                }) else {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!(
                            "Input '{}' of rule '{}' aggregates over '{checkpoint}', which is not a checkpoint rule with a directory output",
                            input.name, rule.name
                        ),
                    ));
                    continue;
                };

                let unbound_dir: Vec<&str> = dir
                    .pattern
                    .placeholders()
                    .into_iter()
                    .filter(|p| !consumer.contains(p))
                    .collect();
                if !unbound_dir.is_empty() {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!(
                            "Rule '{}' cannot locate the directory of '{checkpoint}': {{{}}} is not bound by its outputs",
                            rule.name,
                            unbound_dir.join("}, {")
                        ),
                    ));
                }

                let discovered: BTreeSet<&str> = pattern.placeholders().into_iter().collect();
                for target in targets {
                    let unbound: Vec<&str> = target
                        .placeholders()
                        .into_iter()
                        .filter(|p| !consumer.contains(p) && !discovered.contains(p))
                        .collect();
                    if !unbound.is_empty() {
                        diags.push(Diagnostic::new(
                            self.name(),
                            Severity::Error,
                            Some(&rule.name),
                            format!(
                                "Aggregate target '{target}' of rule '{}' uses {{{}}}, bound neither by the rule's outputs nor by the checkpoint pattern '{pattern}'",
                                rule.name,
                                unbound.join("}, {")
                            ),
                        ));
                    }
                }
            }
        }
        diags
    }
}

struct ResourceBudgetRule;
impl LintRule for ResourceBudgetRule {
    fn name(&self) -> &str {
        "resource_budget"
    }
    fn apply(&self, workflow: &Workflow, config: &EngineConfig) -> Vec<Diagnostic> {
        let budget = config.budget();
        let mut diags = Vec::new();
        for rule in workflow.registry.iter() {
            let requests = match rule.resources.literal() {
                Ok(Some(r)) => vec![(None, r)],
                Err(e) => {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!("Rule '{}' has invalid resources: {e}", rule.name),
                    ));
                    continue;
                }
                Ok(None) => workflow
                    .store
                    .sample_names()
                    .filter_map(|sample| {
                        let binding = Binding::new().with(workflow.store.sample_wildcard(), sample);
                        rule.resources
                            .resolve(&binding, &workflow.store)
                            .ok()
                            .map(|r| (Some(sample), r))
                    })
                    .collect(),
            };
            for (sample, requested) in requests {
                if requested.fits_within(&budget) {
                    continue;
                }
                let scope = sample.map(|s| format!(" for sample '{s}'")).unwrap_or_default();
                diags.push(
                    Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!(
                            "Rule '{}' requests {requested}{scope}, more than the budget {budget}",
                            rule.name
                        ),
                    )
                    .with_fix("Lower the request or raise --cores / --mem-mb"),
                );
            }
        }
        diags
    }
}

/// Every `{...}` in a shell command must name something the task will have.
struct CommandTemplateRule;
impl LintRule for CommandTemplateRule {
    fn name(&self) -> &str {
        "command_template"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for rule in workflow.registry.iter() {
            let ActionSpec::Shell { command } = &rule.action else {
                continue;
            };
            let keys = match template_keys(command) {
                Ok(keys) => keys,
                Err(e) => {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!("Command of rule '{}': {e}", rule.name),
                    ));
                    continue;
                }
            };
            let wildcards: BTreeSet<&str> = rule
                .outputs
                .iter()
                .flat_map(|o| o.pattern.placeholders())
                .collect();
            for key in keys {
                let known = match key.split_once('.') {
                    Some(("input", n)) => rule.inputs.iter().any(|i| i.name == n),
                    Some(("output", n)) => rule.outputs.iter().any(|o| o.name == n),
                    Some(("params", n)) => rule.params.contains_key(n),
                    Some(("wildcards", n)) => wildcards.contains(n),
                    Some(_) => false,
                    None => matches!(
                        key.as_str(),
                        "input" | "output" | "threads" | "mem_mb" | "log" | "benchmark" | "tmpdir"
                    ),
                };
                if !known {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!("Command of rule '{}' references unknown '{{{key}}}'", rule.name),
                    ));
                }
            }
        }
        diags
    }
}

struct ConfigKeysRule;
impl LintRule for ConfigKeysRule {
    fn name(&self) -> &str {
        "config_keys"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        let store = &workflow.store;
        let mut diags = Vec::new();
        let mut referenced = BTreeSet::new();

        for rule in workflow.registry.iter() {
            for (param, value) in param_values(rule) {
                let ParamValue::Config { config: key, default } = value else {
                    continue;
                };
                referenced.insert(key.as_str());
                if default.is_some() {
                    continue;
                }
                let missing: Vec<&str> = store
                    .sample_names()
                    .filter(|s| {
                        let binding = Binding::new().with(store.sample_wildcard(), *s);
                        store.lookup(&binding, key).is_none()
                    })
                    .collect();
                let no_samples = store.sample_names().next().is_none();
                if no_samples && store.lookup(&Binding::new(), key).is_none() {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        Some(&rule.name),
                        format!("'{param}' of rule '{}' reads config key '{key}', which is not set", rule.name),
                    ));
                } else if !missing.is_empty() {
                    diags.push(
                        Diagnostic::new(
                            self.name(),
                            Severity::Error,
                            Some(&rule.name),
                            format!(
                                "'{param}' of rule '{}' reads config key '{key}', missing for sample(s) {}",
                                rule.name,
                                missing.join(", ")
                            ),
                        )
                        .with_fix("Set the key for every sample or give the parameter a default"),
                    );
                }
            }
        }

        let mut unused = BTreeSet::new();
        for sample in store.sample_names() {
            if let Some(map) = store.sample(sample) {
                unused.extend(map.keys().map(String::as_str).filter(|k| !referenced.contains(k)));
            }
        }
        for key in unused {
            diags.push(Diagnostic::new(
                self.name(),
                Severity::Info,
                None,
                format!("Sample config key '{key}' is not read by any rule"),
            ));
        }
        diags
    }
}

struct TargetsRule;
impl LintRule for TargetsRule {
    fn name(&self) -> &str {
        "targets"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        if workflow.targets.is_empty() {
            return vec![Diagnostic::new(
                self.name(),
                Severity::Warning,
                None,
                "Workflow declares no targets; nothing runs unless paths are given".into(),
            )];
        }
        let sample = workflow.store.sample_wildcard();
        workflow
            .targets
            .iter()
            .filter(|t| t.placeholders().iter().any(|p| *p != sample))
            .map(|t| {
                Diagnostic::new(
                    self.name(),
                    Severity::Error,
                    None,
                    format!("Target '{t}' uses placeholders other than {{{sample}}}"),
                )
            })
            .collect()
    }
}

/// Plans from every target with placeholder values filled in, and
/// reports rules no target can ever reach. Overlapping output patterns found
/// on the way are errors.
struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str {
        "reachability"
    }
    fn apply(&self, workflow: &Workflow, _config: &EngineConfig) -> Vec<Diagnostic> {
        if workflow.targets.is_empty() {
            return vec![];
        }
        let registry = &workflow.registry;
        let mut diags = Vec::new();
        let mut reached: BTreeSet<String> = BTreeSet::new();
        let mut seen_paths: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        for target in &workflow.targets {
            if let Ok(path) = target.instantiate(&placeholder_binding(target, &Binding::new())) {
                queue.push_back(path);
            }
        }

        while let Some(path) = queue.pop_front() {
            if !seen_paths.insert(path.clone()) {
                continue;
            }
            let (rule, binding) = match registry.lookup_by_output_pattern(&path) {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(e) => {
                    diags.push(Diagnostic::new(self.name(), Severity::Error, None, e.to_string()));
                    continue;
                }
            };
            if !reached.insert(rule.name.clone()) {
                continue;
            }
            for input in &rule.inputs {
                match &input.kind {
                    InputKind::Path(p) => {
                        if let Ok(next) = p.instantiate(&placeholder_binding(p, &binding)) {
                            queue.push_back(next);
                        }
                    }
                    InputKind::Aggregate { checkpoint, targets } => {
                        let Some(ck) = registry.get(checkpoint) else { continue };
                        if let Some(dir) = ck.checkpoint_directory() {
                            if let Ok(next) = dir.pattern.instantiate(&placeholder_binding(&dir.pattern, &binding)) {
                                queue.push_back(next);
                            }
                        }
                        for t in targets {
                            if let Ok(next) = t.instantiate(&placeholder_binding(t, &binding)) {
                                queue.push_back(next);
                            }
                        }
                    }
                }
            }
        }

        for rule in registry.iter().filter(|r| !reached.contains(&r.name)) {
            diags.push(
                Diagnostic::new(
                    self.name(),
                    Severity::Warning,
                    Some(&rule.name),
                    format!("Rule '{}' is not reachable from any target", rule.name),
                )
                .with_fix("Reference one of its outputs from a target or another rule, or remove it"),
            );
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(workflow: &Workflow, config: &EngineConfig) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(OutputPlaceholdersRule),
        Box::new(CheckpointDirectoryRule),
        Box::new(AggregateSourceRule),
        Box::new(ResourceBudgetRule),
        Box::new(CommandTemplateRule),
        Box::new(ConfigKeysRule),
        Box::new(TargetsRule),
        Box::new(ReachabilityRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(workflow, config));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(workflow: &Workflow, config: &EngineConfig) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(workflow, config);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(SatflowError::Configuration(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(value: serde_json::Value) -> Workflow {
        Workflow::from_json(&value.to_string()).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "engine": {"cores": 8, "mem_mb": 16000},
            "samples": {"S1": {"k": 21}, "S2": {"k": 25}},
            "targets": ["results/{sample}.bed"],
            "rules": [
                {"name": "count", "input": ["reads/{sample}.fa"], "output": ["work/{sample}.txt"],
                 "params": {"k": {"config": "k"}}, "resources": {"threads": 4},
                 "action": {"type": "shell", "command": "kmc -k{params.k} -t{threads} {input} {output}"}},
                {"name": "split", "input": ["work/{sample}.txt"],
                 "output": [{"name": "dir", "path": "split/{sample}", "directory": true}],
                 "checkpoint": {"pattern": "{part}.fa"},
                 "action": {"type": "shell", "command": "split {input} {output.dir}"}},
                {"name": "align", "input": ["split/{sample}/{part}.fa"], "output": ["bed/{sample}/{part}.bed"],
                 "action": {"type": "shell", "command": "align {wildcards.part} {input} > {output}"}},
                {"name": "merge",
                 "input": [{"name": "beds", "aggregate": {"checkpoint": "split", "targets": "bed/{sample}/{part}.bed"}}],
                 "output": ["results/{sample}.bed"], "action": {"type": "merge_sorted"}}
            ]
        })
    }

    fn errors(diags: &[Diagnostic]) -> Vec<&Diagnostic> {
        diags.iter().filter(|d| d.severity == Severity::Error).collect()
    }

    #[test]
    fn valid_workflow_passes() {
        let wf = workflow(base());
        let diags = validate(&wf, &wf.engine);
        assert!(errors(&diags).is_empty(), "Expected no errors, got: {diags:?}");
        assert!(!diags.iter().any(|d| d.lint == "reachability"), "{diags:?}");
        assert!(validate_or_raise(&wf, &wf.engine).is_ok());
    }

    #[test]
    fn output_missing_input_placeholder() {
        let mut v = base();
        v["rules"][0]["output"] = json!(["work/counts.txt"]);
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(
            diags.iter().any(|d| d.lint == "output_placeholders" && d.message.contains("{sample}")),
            "{diags:?}"
        );
    }

    #[test]
    fn checkpoint_without_directory_output() {
        let mut v = base();
        v["rules"][1]["output"] = json!(["split/{sample}.done"]);
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(diags.iter().any(|d| d.lint == "checkpoint_directory"), "{diags:?}");
        // the consumer can no longer find a discovery directory either
        assert!(diags.iter().any(|d| d.lint == "aggregate_source"), "{diags:?}");
    }

    #[test]
    fn aggregate_over_non_checkpoint() {
        let mut v = base();
        v["rules"][3]["input"][0]["aggregate"]["checkpoint"] = json!("align");
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(
            diags.iter().any(|d| d.lint == "aggregate_source" && d.rule_name.as_deref() == Some("merge")),
            "{diags:?}"
        );
    }

    #[test]
    fn aggregate_target_with_unbound_placeholder() {
        let mut v = base();
        v["rules"][3]["input"][0]["aggregate"]["targets"] = json!("bed/{sample}/{chunk}.bed");
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(
            diags.iter().any(|d| d.lint == "aggregate_source" && d.message.contains("{chunk}")),
            "{diags:?}"
        );
    }

    #[test]
    fn resources_over_budget() {
        let wf = workflow(base());
        let mut small = wf.engine.clone();
        small.cores = 2;
        let diags = validate(&wf, &small);
        assert!(
            diags.iter().any(|d| d.lint == "resource_budget" && d.rule_name.as_deref() == Some("count")),
            "{diags:?}"
        );
        assert!(validate_or_raise(&wf, &small).is_err());
    }

    #[test]
    fn per_sample_resource_requests_checked() {
        let mut v = base();
        v["samples"]["S2"]["mem"] = json!(64000);
        v["samples"]["S1"]["mem"] = json!(1000);
        v["rules"][0]["resources"]["mem_mb"] = json!({"config": "mem"});
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        let over: Vec<_> = diags.iter().filter(|d| d.lint == "resource_budget").collect();
        assert_eq!(over.len(), 1, "{diags:?}");
        assert!(over[0].message.contains("S2"));
    }

    #[test]
    fn unknown_command_reference() {
        let mut v = base();
        v["rules"][2]["action"]["command"] = json!("align {params.preset} {wildcards.chunk} {input}");
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        let bad: Vec<_> = diags.iter().filter(|d| d.lint == "command_template").collect();
        assert_eq!(bad.len(), 2, "{diags:?}");
    }

    #[test]
    fn missing_config_key_and_unused_key() {
        let mut v = base();
        v["samples"]["S2"] = json!({"kmer": 25});
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(
            diags.iter().any(|d| d.lint == "config_keys"
                && d.severity == Severity::Error
                && d.message.contains("S2")),
            "{diags:?}"
        );
        assert!(
            diags.iter().any(|d| d.lint == "config_keys"
                && d.severity == Severity::Info
                && d.message.contains("'kmer'")),
            "{diags:?}"
        );
    }

    #[test]
    fn config_default_satisfies_missing_key() {
        let mut v = base();
        v["samples"]["S2"] = json!({});
        v["rules"][0]["params"]["k"] = json!({"config": "k", "default": 21});
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(errors(&diags).is_empty(), "{diags:?}");
    }

    #[test]
    fn unreachable_rule_warning() {
        let mut v = base();
        v["rules"].as_array_mut().unwrap().push(json!({
            "name": "orphan", "input": ["work/{sample}.txt"], "output": ["orphan/{sample}.txt"],
            "action": {"type": "touch"}
        }));
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(
            diags.iter().any(|d| d.lint == "reachability"
                && d.severity == Severity::Warning
                && d.rule_name.as_deref() == Some("orphan")),
            "{diags:?}"
        );
    }

    #[test]
    fn overlapping_producers_reported() {
        let mut v = base();
        v["rules"].as_array_mut().unwrap().push(json!({
            "name": "count_again", "output": ["work/{name}.txt"], "action": {"type": "touch"}
        }));
        let wf = workflow(v);
        let diags = validate(&wf, &wf.engine);
        assert!(
            diags.iter().any(|d| d.lint == "reachability" && d.severity == Severity::Error),
            "{diags:?}"
        );
    }

    #[test]
    fn targets_checked() {
        let mut v = base();
        v["targets"] = json!([]);
        let wf = workflow(v);
        assert!(validate(&wf, &wf.engine)
            .iter()
            .any(|d| d.lint == "targets" && d.severity == Severity::Warning));

        let mut v = base();
        v["targets"] = json!(["results/{sample}/{part}.bed"]);
        let wf = workflow(v);
        assert!(validate(&wf, &wf.engine)
            .iter()
            .any(|d| d.lint == "targets" && d.severity == Severity::Error));
    }
}
