//! End-to-end workflow runs against in-memory backends.

use pretty_assertions::assert_eq;
use sluice_cache::MemoryStore;
use sluice_core::context::InvocationContext;
use sluice_core::ports::MemorySink;
use sluice_core::run::{InstanceState, RunStatus};
use sluice_runner::ShellExecutor;
use sluice_scheduler::{Scheduler, SchedulerConfig, SkipPolicy};
use sluice_tests::{TestHarness, init_test_logging};
use sluice_workspace::WorkspaceStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_pipeline_with_workspace_handoff() {
    init_test_logging();
    let h = TestHarness::new();
    let report = h
        .run(
            r#"
name: ci
jobs:
  - name: build
    workspace:
      persist: [dist]
    steps:
      - name: compile
        uses: run
        with: {write: dist/app.bin, contents: binary}
  - name: test
    requires: [build]
    matrix:
      parameters:
        py: ["3.10", "3.11"]
    workspace:
      attach_at: inputs
    steps:
      - name: check-artifact
        uses: run
        with: {exists: inputs/dist/app.bin}
  - name: deploy
    requires: [test]
    condition: "${{ ref.name }} == main"
    steps:
      - name: ship
        uses: run
"#,
            InvocationContext::branch("main"),
        )
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.instances.len(), 4);
    for (name, state) in report.states() {
        assert_eq!(state, InstanceState::Succeeded, "instance {}", name);
    }
    assert_eq!(
        report.instance("build").unwrap().artifacts,
        vec!["dist/app.bin".to_string()]
    );
}

#[tokio::test]
async fn test_workspace_layers_are_isolated() {
    init_test_logging();
    let h = TestHarness::new();
    let report = h
        .run(
            r#"
name: ci
jobs:
  - name: left
    workspace:
      persist: [left.txt]
    steps:
      - name: write-left
        uses: run
        with: {write: left.txt}
  - name: right
    workspace:
      persist: [right.txt]
    steps:
      - name: write-right
        uses: run
        with: {write: right.txt}
  - name: consumer
    requires: [left]
    workspace:
      attach_at: inputs
    steps:
      - name: has-left
        uses: run
        with: {exists: inputs/left.txt}
      - name: no-right
        uses: run
        with: {absent: inputs/right.txt}
"#,
            InvocationContext::branch("main"),
        )
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.instance("consumer").unwrap().state,
        InstanceState::Succeeded
    );
}

#[tokio::test]
async fn test_cache_cold_then_warm() {
    init_test_logging();
    let h = TestHarness::new();
    let cold_yaml = r#"
name: ci
jobs:
  - name: deps
    cache:
      key_inputs: [requirements.txt]
      paths: [venv]
    steps:
      - name: install
        uses: run
        with: {write: venv/lib.txt, contents: resolved}
"#;

    let cold = h.run(cold_yaml, InvocationContext::branch("main")).await;
    let usage = cold.instance("deps").unwrap().cache.clone().unwrap();
    assert!(!usage.hit);
    assert!(usage.saved);

    // Same cache spec, but this run only checks that the restored blob
    // materialized the files; nothing writes them.
    let warm_yaml = r#"
name: ci
jobs:
  - name: deps
    cache:
      key_inputs: [requirements.txt]
      paths: [venv]
    steps:
      - name: restored
        uses: run
        with: {exists: venv/lib.txt}
"#;

    let warm = h.run(warm_yaml, InvocationContext::branch("main")).await;
    assert_eq!(warm.status, RunStatus::Succeeded);
    let usage = warm.instance("deps").unwrap().cache.clone().unwrap();
    assert!(usage.hit);
    assert!(!usage.saved);
}

#[tokio::test]
async fn test_failure_cancels_transitive_dependents() {
    init_test_logging();
    let h = TestHarness::new();
    let report = h
        .run(
            r#"
name: ci
jobs:
  - name: build
    steps:
      - name: compile
        uses: run
        with: {fail: true}
  - name: test
    requires: [build]
    steps: [{name: pytest, uses: run}]
  - name: deploy
    requires: [test]
    steps: [{name: ship, uses: run}]
  - name: lint
    steps: [{name: ruff, uses: run}]
"#,
            InvocationContext::branch("main"),
        )
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.instance("build").unwrap().state,
        InstanceState::Failed
    );
    assert_eq!(
        report.instance("test").unwrap().state,
        InstanceState::Canceled
    );
    assert_eq!(
        report.instance("deploy").unwrap().state,
        InstanceState::Canceled
    );
    assert_eq!(
        report.instance("lint").unwrap().state,
        InstanceState::Succeeded
    );
    assert!(!h.executor.ran("pytest"));
    assert!(!h.executor.ran("ship"));
}

#[tokio::test]
async fn test_optional_failure_keeps_run_green() {
    init_test_logging();
    let h = TestHarness::new();
    let report = h
        .run(
            r#"
name: ci
jobs:
  - name: canary
    optional: true
    steps:
      - name: flaky
        uses: run
        with: {fail: true}
  - name: canary-summary
    requires: [canary]
    steps: [{name: collect, uses: run}]
  - name: build
    steps: [{name: compile, uses: run}]
"#,
            InvocationContext::branch("main"),
        )
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.instance("canary").unwrap().state,
        InstanceState::Failed
    );
    assert_eq!(
        report.instance("canary-summary").unwrap().state,
        InstanceState::Canceled
    );
}

#[tokio::test]
async fn test_skip_policy_satisfies_dependents() {
    init_test_logging();
    let h = TestHarness::new();
    let yaml = r#"
name: ci
jobs:
  - name: docs
    condition: "${{ ref.name }} == main"
    steps: [{name: mkdocs, uses: run}]
  - name: publish
    requires: [docs]
    steps: [{name: push, uses: run}]
"#;

    let report = h.run(yaml, InvocationContext::branch("develop")).await;
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.instance("docs").unwrap().state,
        InstanceState::Skipped
    );
    assert_eq!(
        report.instance("publish").unwrap().state,
        InstanceState::Succeeded
    );
    assert!(h.executor.ran("push"));
}

#[tokio::test]
async fn test_skip_policy_fails_dependents() {
    init_test_logging();
    let h = TestHarness::with_policy(SkipPolicy::FailsDependents);
    let yaml = r#"
name: ci
jobs:
  - name: docs
    condition: "${{ ref.name }} == main"
    steps: [{name: mkdocs, uses: run}]
  - name: publish
    requires: [docs]
    steps: [{name: push, uses: run}]
"#;

    let report = h.run(yaml, InvocationContext::branch("develop")).await;
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.instance("publish").unwrap().state,
        InstanceState::Canceled
    );
    assert!(!h.executor.ran("push"));
}

#[tokio::test]
async fn test_tag_filters() {
    init_test_logging();
    let yaml = r#"
name: release
filters:
  tags: ["v*"]
jobs:
  - name: publish
    steps: [{name: push, uses: run}]
"#;

    let h = TestHarness::new();
    let tagged = h.run(yaml, InvocationContext::tag("v1.2.0")).await;
    assert_eq!(tagged.status, RunStatus::Succeeded);
    assert_eq!(
        tagged.instance("publish").unwrap().state,
        InstanceState::Succeeded
    );

    let h = TestHarness::new();
    let branch = h.run(yaml, InvocationContext::branch("main")).await;
    assert_eq!(branch.status, RunStatus::Succeeded);
    assert_eq!(
        branch.instance("publish").unwrap().state,
        InstanceState::Skipped
    );
    assert!(!h.executor.ran("push"));
}

#[tokio::test]
async fn test_parameter_override_flips_condition() {
    init_test_logging();
    let yaml = r#"
name: ci
parameters:
  run_deploy: "false"
jobs:
  - name: deploy
    condition: "${{ params.run_deploy }} == true"
    steps: [{name: ship, uses: run}]
"#;

    let h = TestHarness::new();
    let defaulted = h.run(yaml, InvocationContext::branch("main")).await;
    assert_eq!(
        defaulted.instance("deploy").unwrap().state,
        InstanceState::Skipped
    );

    let h = TestHarness::new();
    let overridden = h
        .run(
            yaml,
            InvocationContext::branch("main").with_parameter("run_deploy", "true"),
        )
        .await;
    assert_eq!(
        overridden.instance("deploy").unwrap().state,
        InstanceState::Succeeded
    );
}

#[tokio::test]
async fn test_cancellation_drains_in_flight_work() {
    init_test_logging();
    let h = TestHarness::new();
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = cancel_tx.send(true);
    });

    let report = h
        .run_with_cancel(
            r#"
name: ci
jobs:
  - name: build
    steps:
      - name: first
        uses: run
        with: {sleep_ms: 100}
      - name: second
        uses: run
  - name: test
    requires: [build]
    steps: [{name: pytest, uses: run}]
"#,
            InvocationContext::branch("main"),
            cancel_rx,
        )
        .await;

    assert_eq!(report.status, RunStatus::Canceled);
    assert_eq!(
        report.instance("build").unwrap().state,
        InstanceState::Canceled
    );
    assert_eq!(
        report.instance("test").unwrap().state,
        InstanceState::Canceled
    );
    assert!(h.executor.ran("first"));
    assert!(!h.executor.ran("second"));
    assert!(!h.executor.ran("pytest"));
}

#[tokio::test]
async fn test_reports_reach_sink_in_topological_order() {
    init_test_logging();
    let h = TestHarness::new();
    let report = h
        .run(
            r#"
name: ci
jobs:
  - name: build
    steps: [{name: compile, uses: run}]
  - name: test
    requires: [build]
    steps: [{name: pytest, uses: run}]
"#,
            InvocationContext::branch("main"),
        )
        .await;

    let recorded = h.sink.reports().await;
    assert_eq!(recorded.len(), 2);
    let names: Vec<&str> = recorded.iter().map(|r| r.instance.as_str()).collect();
    let reported: Vec<&str> = report.instances.iter().map(|r| r.instance.as_str()).collect();
    assert_eq!(names, reported);
    assert_eq!(names, vec!["build", "test"]);
}

#[tokio::test]
async fn test_shell_executor_end_to_end() {
    init_test_logging();
    let work = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(WorkspaceStore::new()),
        Arc::new(MemorySink::new()),
        SchedulerConfig {
            slots: 2,
            skip_policy: SkipPolicy::default(),
            work_root: work.path().to_path_buf(),
        },
    );

    let definition = sluice_core::definition::WorkflowDefinition::from_yaml(
        r#"
name: ci
env:
  STAMP: from-workflow
jobs:
  - name: build
    workspace:
      persist: [out.txt]
    steps:
      - name: emit
        uses: run
        with: {command: "printf '%s' \"$STAMP\" > out.txt"}
  - name: verify
    requires: [build]
    workspace:
      attach_at: inputs
    steps:
      - name: check
        uses: run
        with: {command: "test \"$(cat inputs/out.txt)\" = from-workflow"}
"#,
    )
    .unwrap();
    let run = sluice_scheduler::GraphBuilder::new().build(&definition).unwrap();

    let report = scheduler
        .run(run, InvocationContext::branch("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.instance("verify").unwrap().state,
        InstanceState::Succeeded
    );
}
