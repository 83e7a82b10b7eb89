//! End-to-end tests for the satflow engine.
//!
//! Each test goes through the full path: load workflow -> validate -> plan ->
//! execute with real `bash` -> inspect files on disk and the run summary.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use satflow_pipeline::{
    validate, validate_or_raise, EngineEvent, Executor, Severity, TaskGraph, Workflow,
};
use satflow_types::{SatflowError, TaskState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(dir: &Path, mut value: Value) -> Workflow {
    value["engine"]["workdir"] = json!(dir);
    value["engine"]["tmp_root"] = json!(dir.join("tmp"));
    Workflow::from_json(&value.to_string()).expect("workflow should load")
}

fn plan(wf: &Workflow) -> TaskGraph {
    let targets = wf.select_targets(&[]).expect("targets");
    wf.planner().plan(&targets).expect("planning should succeed")
}

fn read(dir: &Path, path: &str) -> String {
    std::fs::read_to_string(dir.join(path)).unwrap_or_else(|e| panic!("{path}: {e}"))
}

fn write(dir: &Path, path: &str, content: &str) {
    let path = dir.join(path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Satellite-style pipeline: clean reads, split per contig at a checkpoint,
/// measure every contig, look for a motif (often absent), then merge both
/// per-contig result sets per sample.
fn satellite() -> Value {
    json!({
        "engine": {"cores": 4},
        "samples": {"a": {}, "b": {}},
        "targets": ["results/{sample}.bed", "results/{sample}.mono.tsv"],
        "rules": [
            {"name": "clean", "input": ["data/{sample}.fa"],
             "output": [{"name": "fa", "path": "work/{sample}.clean.fa", "temp": true}],
             "action": {"type": "shell", "command": "grep -v '^$' {input} > {output}"}},
            {"name": "split", "input": ["work/{sample}.clean.fa"],
             "output": [{"name": "dir", "path": "split/{sample}", "directory": true}],
             "checkpoint": {"pattern": "{contig}.fa"},
             "action": {"type": "shell",
                        "command": "mkdir -p {output} && awk '/^>/{{name=substr($1,2); next}} {{print > (\"{output}/\" name \".fa\")}}' {input}"}},
            {"name": "align", "input": ["split/{sample}/{contig}.fa"],
             "output": ["bed/{sample}/{contig}.bed"],
             "action": {"type": "shell",
                        "command": "awk -v c={wildcards.contig} '{{n += length($0)}} END {{print c \"\\t0\\t\" n}}' {input} > {output}"}},
            {"name": "motif", "input": ["split/{sample}/{contig}.fa"],
             "output": [{"name": "hits", "path": "motif/{sample}/{contig}.txt", "allow_empty": true}],
             "tolerate_exit_codes": [1],
             "action": {"type": "shell", "command": "grep -o ACGT {input} > {output}"}},
            {"name": "mono", "input": ["motif/{sample}/{contig}.txt"],
             "output": [{"name": "table", "path": "mono/{sample}/{contig}.tsv", "allow_empty": true}],
             "action": {"type": "shell",
                        "command": "awk -v c={wildcards.contig} '{{print c \"\\t\" $0}}' {input} > {output}"}},
            {"name": "merge_bed",
             "input": [{"name": "beds", "aggregate": {"checkpoint": "split", "targets": "bed/{sample}/{contig}.bed"}}],
             "output": ["results/{sample}.bed"],
             "action": {"type": "merge_sorted"}},
            {"name": "merge_mono",
             "input": [{"name": "tables", "aggregate": {"checkpoint": "split", "targets": "mono/{sample}/{contig}.tsv"}}],
             "output": ["results/{sample}.mono.tsv"],
             "action": {"type": "merge_sorted", "key": "name"}}
        ]
    })
}

fn seed_reads(dir: &Path) {
    write(dir, "data/a.fa", ">c2\nTTTT\n\n>c1\nACGTACGT\n");
    write(dir, "data/b.fa", ">c3\nGGGACGTA\n");
}

// ---------------------------------------------------------------------------
// Checkpoint-driven pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn checkpoint_pipeline_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    seed_reads(dir.path());
    let wf = load(dir.path(), satellite());

    let diags = validate_or_raise(&wf, &wf.engine).expect("validation should pass");
    assert!(
        !diags.iter().any(|d| d.severity == Severity::Warning),
        "unexpected warnings: {diags:?}"
    );

    let mut graph = plan(&wf);
    // merges and splits are known up front; per-contig work is not
    assert_eq!(graph.len(), 8);

    let executor = Executor::new(wf.planner());
    let mut events = executor.events().subscribe();
    let summary = executor.run(&mut graph).await.expect("run should not abort");

    assert!(summary.is_success(), "{summary:?}");
    // a: clean, split, 2x(align, motif, mono), 2 merges; b: same with 1 contig
    assert_eq!(summary.succeeded, 17);
    assert_eq!(graph.len(), 17);

    assert_eq!(read(dir.path(), "results/a.bed"), "c1\t0\t8\nc2\t0\t4\n");
    assert_eq!(read(dir.path(), "results/b.bed"), "c3\t0\t8\n");
    // c2 has no motif hit: grep exit 1 is tolerated, the empty file accepted,
    // and the monomer step still leaves an empty table behind
    assert_eq!(read(dir.path(), "motif/a/c2.txt"), "");
    assert_eq!(read(dir.path(), "mono/a/c2.tsv"), "");
    assert_eq!(read(dir.path(), "results/a.mono.tsv"), "c1\tACGT\nc1\tACGT\n");
    assert_eq!(read(dir.path(), "results/b.mono.tsv"), "c3\tACGT\n");

    // temp input of the checkpoint is gone once the split succeeded
    assert!(!dir.path().join("work/a.clean.fa").exists());
    assert!(dir.path().join("logs/align/c1.a.log").exists());
    assert!(dir.path().join("benchmarks/align/c1.a.tsv").exists());

    let mut replanned = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::CheckpointReplanned { task, new_tasks, .. } = event {
            replanned.push((task, new_tasks));
        }
    }
    replanned.sort();
    assert_eq!(
        replanned,
        vec![
            ("split[sample=a]".to_string(), 6),
            ("split[sample=b]".to_string(), 3)
        ]
    );
}

#[tokio::test]
async fn rerun_after_success_plans_nothing() {
    let dir = tempfile::tempdir().unwrap();
    seed_reads(dir.path());
    let wf = load(dir.path(), satellite());
    let mut graph = plan(&wf);
    let summary = Executor::new(wf.planner()).run(&mut graph).await.unwrap();
    assert!(summary.is_success());

    let again = plan(&wf);
    assert!(again.is_empty(), "{:?}", again.ids());
}

#[tokio::test]
async fn checkpoint_with_zero_entries_still_merges() {
    let dir = tempfile::tempdir().unwrap();
    let wf = load(
        dir.path(),
        json!({
            "samples": {"z": {}},
            "targets": ["results/{sample}.txt"],
            "rules": [
                {"name": "split",
                 "output": [{"name": "dir", "path": "split/{sample}", "directory": true}],
                 "checkpoint": {"pattern": "{part}.fa"},
                 "action": {"type": "shell", "command": "mkdir -p {output}"}},
                {"name": "measure", "input": ["split/{sample}/{part}.fa"],
                 "output": ["measure/{sample}/{part}.txt"],
                 "action": {"type": "shell", "command": "wc -c < {input} > {output}"}},
                {"name": "merge",
                 "input": [{"name": "parts", "aggregate": {"checkpoint": "split", "targets": "measure/{sample}/{part}.txt"}}],
                 "output": ["results/{sample}.txt"],
                 "action": {"type": "merge_sorted"}}
            ]
        }),
    );
    let mut graph = plan(&wf);
    let summary = Executor::new(wf.planner()).run(&mut graph).await.unwrap();

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(read(dir.path(), "results/z.txt"), "");
}

#[tokio::test]
async fn temp_output_survives_until_checkpoint_consumers_run() {
    let dir = tempfile::tempdir().unwrap();
    let wf = load(
        dir.path(),
        json!({
            "samples": {"s": {}},
            "targets": ["stats/{sample}.txt", "results/{sample}.txt"],
            "rules": [
                {"name": "index",
                 "output": [{"name": "idx", "path": "ref/{sample}.idx", "temp": true}],
                 "action": {"type": "shell", "command": "echo idx > {output}"}},
                {"name": "stats", "input": ["ref/{sample}.idx"],
                 "output": ["stats/{sample}.txt"],
                 "action": {"type": "shell", "command": "wc -c < {input} > {output}"}},
                {"name": "split",
                 "output": [{"name": "dir", "path": "split/{sample}", "directory": true}],
                 "checkpoint": {"pattern": "{c}.fa"},
                 "action": {"type": "shell",
                            "command": "sleep 1; mkdir -p {output}; echo A > {output}/c1.fa; echo C > {output}/c2.fa"}},
                {"name": "align",
                 "input": [
                     {"name": "chunk", "path": "split/{sample}/{c}.fa"},
                     {"name": "idx", "path": "ref/{sample}.idx"}
                 ],
                 "output": ["aln/{sample}/{c}.txt"],
                 "action": {"type": "shell", "command": "echo {wildcards.c} $(cat {input.idx}) > {output}"}},
                {"name": "merge",
                 "input": [{"name": "parts", "aggregate": {"checkpoint": "split", "targets": "aln/{sample}/{c}.txt"}}],
                 "output": ["results/{sample}.txt"],
                 "action": {"type": "merge_sorted"}}
            ]
        }),
    );
    let mut graph = plan(&wf);
    assert_eq!(graph.len(), 4);

    let executor = Executor::new(wf.planner());
    let mut events = executor.events().subscribe();
    let summary = executor.run(&mut graph).await.expect("run should not abort");

    assert!(summary.is_success(), "{summary:?}");
    // index, stats, split, 2x align, merge
    assert_eq!(summary.succeeded, 6);
    assert_eq!(read(dir.path(), "results/s.txt"), "c1 idx\nc2 idx\n");
    assert!(!dir.path().join("ref/s.idx").exists());

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::CheckpointReplanned { .. } => order.push("replanned"),
            EngineEvent::TempRemoved { .. } => order.push("removed"),
            _ => {}
        }
    }
    assert_eq!(order, vec!["replanned", "removed"]);
}

#[tokio::test]
async fn existing_checkpoint_directory_is_expanded_at_plan_time() {
    let dir = tempfile::tempdir().unwrap();
    seed_reads(dir.path());
    write(dir.path(), "split/a/x1.fa", "ACGT\n");
    write(dir.path(), "split/a/x2.fa", "AC\n");
    let wf = load(dir.path(), satellite());

    let graph = wf
        .planner()
        .plan(&[PathBuf::from("results/a.bed")])
        .unwrap();
    let rules: Vec<String> = graph.tasks().map(|t| t.id.rule.clone()).collect();
    assert_eq!(rules.iter().filter(|r| *r == "align").count(), 2);
    assert!(!rules.iter().any(|r| r == "split" || r == "clean"));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

fn flaky(keep_going: bool) -> Value {
    json!({
        "engine": {"cores": 2, "keep_going": keep_going},
        "samples": {"a": {}, "b": {}},
        "targets": ["final/{sample}.txt"],
        "rules": [
            {"name": "step", "output": ["out/{sample}.txt"],
             "action": {"type": "shell",
                        "command": "if [ {wildcards.sample} = b ]; then echo \"boom {wildcards.sample}\" >&2; exit 3; fi; sleep 0.5; echo ok > {output}"}},
            {"name": "post", "input": ["out/{sample}.txt"], "output": ["final/{sample}.txt"],
             "action": {"type": "shell", "command": "cp {input} {output}"}}
        ]
    })
}

#[tokio::test]
async fn failure_is_contained_to_its_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let wf = load(dir.path(), flaky(true));
    let mut graph = plan(&wf);
    let summary = Executor::new(wf.planner()).run(&mut graph).await.unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(read(dir.path(), "final/a.txt"), "ok\n");

    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.task, "step[sample=b]");
    assert_eq!(failure.message, "exited with code 3");
    assert_eq!(failure.log_path.as_deref(), Some(Path::new("logs/step/b.log")));
    assert!(failure.log_tail.contains("boom b"), "{}", failure.log_tail);

    let post_b = graph
        .tasks()
        .find(|t| t.id.to_string() == "post[sample=b]")
        .unwrap();
    assert_eq!(post_b.state(), TaskState::Failed);
    assert_eq!(
        post_b.failure().unwrap().upstream.as_ref().map(|u| u.to_string()),
        Some("step[sample=b]".to_string())
    );
}

#[tokio::test]
async fn fail_fast_stops_scheduling_new_work() {
    let dir = tempfile::tempdir().unwrap();
    let wf = load(dir.path(), flaky(false));
    let mut graph = plan(&wf);
    let summary = Executor::new(wf.planner()).run(&mut graph).await.unwrap();

    // step[a] was already running and is allowed to finish
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped, 1);
    assert!(dir.path().join("out/a.txt").exists());
    assert!(!dir.path().join("final/a.txt").exists());
    assert!(graph.tasks().all(|t| t.state().is_terminal()));
}

#[tokio::test]
async fn timeout_fails_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let wf = load(
        dir.path(),
        json!({
            "rules": [{"name": "slow", "output": ["slow.txt"], "timeout_secs": 1,
                       "action": {"type": "shell", "command": "sleep 10; echo late > {output}"}}]
        }),
    );
    let mut graph = wf.planner().plan(&[PathBuf::from("slow.txt")]).unwrap();
    let summary = Executor::new(wf.planner()).run(&mut graph).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].message, "timed out after 1s");
    assert!(!dir.path().join("slow.txt").exists());
}

// ---------------------------------------------------------------------------
// Planning and validation
// ---------------------------------------------------------------------------

#[test]
fn over_budget_rule_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = satellite();
    value["engine"]["cores"] = json!(2);
    value["rules"][2]["resources"] = json!({"threads": 16});
    seed_reads(dir.path());
    write(dir.path(), "split/a/c1.fa", "ACGT\n");
    let wf = load(dir.path(), value);

    let err = validate_or_raise(&wf, &wf.engine).unwrap_err();
    assert!(err.to_string().contains("align"), "{err}");

    let err = wf
        .planner()
        .plan(&[PathBuf::from("results/a.bed")])
        .unwrap_err();
    assert!(matches!(err, SatflowError::ResourceExceedsBudget { .. }), "{err}");
}

#[test]
fn planning_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    seed_reads(dir.path());
    let wf = load(dir.path(), satellite());

    let first = plan(&wf);
    let second = plan(&wf);
    assert_eq!(first.ids(), second.ids());
    assert_eq!(
        first.topological_order().unwrap(),
        second.topological_order().unwrap()
    );
}

#[test]
fn unknown_sample_selection_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let wf = load(dir.path(), satellite());
    let err = wf.select_targets(&["nope".to_string()]).unwrap_err();
    assert!(err.is_planning());
    assert!(validate(&wf, &wf.engine)
        .iter()
        .all(|d| d.severity != Severity::Error));
}

#[test]
fn bundled_satellite_workflow_is_valid() {
    let wf = Workflow::from_json(include_str!("../../../pipelines/satellite.json")).unwrap();
    let mut engine = wf.engine.clone();
    engine.cores = 8;
    let diags = validate(&wf, &engine);
    assert!(
        diags.iter().all(|d| d.severity == Severity::Info),
        "{diags:?}"
    );
    assert_eq!(
        wf.select_targets(&["CHM13".to_string()]).unwrap(),
        vec![
            PathBuf::from("results/CHM13.srf.bed"),
            PathBuf::from("results/CHM13.monomers.tsv")
        ]
    );
}
