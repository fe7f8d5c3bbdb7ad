//! Nested pipeline invocations: derived contexts and return bindings

use crate::helpers::*;
use drover::core::{ActionSpec, PipelineDef};
use std::collections::HashMap;

fn nested(pipeline: &str, args: &[(&str, &str)], returns: &[&str]) -> ActionSpec {
    ActionSpec::NestedPipeline {
        pipeline: pipeline.to_string(),
        args: args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        returns: returns.iter().map(|r| r.to_string()).collect(),
    }
}

/// Arguments are resolved against the parent and shadow the child context
#[tokio::test]
async fn test_child_receives_resolved_args() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("echo", "echo \"$1\"")]);
    let child = pipeline("child", vec![agent_step("echo", "child got {{ item }}", 1)]);
    let parent = pipeline(
        "parent",
        vec![
            agent_step("echo", "alpha", 1),
            nested("child", &[("item", "{{ last_output }}")], &[]),
        ],
    );
    let executor = executor_with(&config, vec![child, parent]);

    let result = run_in(&executor, "parent", dir.path()).await.unwrap();

    assert!(result.success);
    // The nested step's Output in the parent trace is the child's final one
    assert_eq!(result.trace.len(), 2);
    assert_eq!(result.trace[1].output.stdout.trim(), "child got alpha");
}

/// Declared returns are copied back; everything else stays in the child
#[tokio::test]
async fn test_returns_copy_only_declared_variables() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[
        ("json", r#"echo '{"verdict": "ship", "secret": "keep"}'"#),
        ("echo", "echo \"$1\""),
    ]);
    let child = pipeline("review", vec![structured_step("json", "judge", 1)]);
    let parent = pipeline(
        "parent",
        vec![
            nested("review", &[], &["verdict"]),
            agent_step("echo", "verdict was {{ verdict }}", 1),
        ],
    );
    let executor = executor_with(&config, vec![child, parent]);

    let result = run_in(&executor, "parent", dir.path()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.output.unwrap().stdout.trim(), "verdict was ship");

    // An undeclared child variable does not leak into the parent
    let parent2 = pipeline(
        "parent2",
        vec![
            nested("review", &[], &["verdict"]),
            agent_step("echo", "secret was {{ secret }}", 1),
        ],
    );
    let executor = executor_with(
        &project_with_agents(&[
            ("json", r#"echo '{"verdict": "ship", "secret": "keep"}'"#),
            ("echo", "echo \"$1\""),
        ]),
        vec![
            pipeline("review", vec![structured_step("json", "judge", 1)]),
            parent2,
        ],
    );
    let result = run_in(&executor, "parent2", dir.path()).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("secret"));
}

/// A failing child fails the parent step; the parent's fail list runs
#[tokio::test]
async fn test_child_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let fail_counter = dir.path().join("fail-runs");

    let config = project_with_agents(&[
        ("broken", "echo 'child broke'; exit 1"),
        ("recorder", "echo ran >> \"$1\""),
    ]);
    let child = pipeline("child", vec![agent_step("broken", "try", 1)]);
    let parent = PipelineDef {
        name: "parent".to_string(),
        steps: vec![nested("child", &[], &[])],
        on_success: vec![],
        on_fail: vec![ActionSpec::AgentCall {
            prompt: fail_counter.display().to_string(),
            agent: "recorder".to_string(),
            structured: false,
            retry: drover::core::RetryPolicy::new(1, 30),
        }],
    };
    let executor = executor_with(&config, vec![child, parent]);

    let result = run_in(&executor, "parent", dir.path()).await.unwrap();

    assert!(!result.success);
    assert_eq!(count_file(&fail_counter), 1);
    assert!(result.error.unwrap().contains("nested pipeline 'child' failed"));
}

/// A child's own fail continuation runs inside the child invocation
#[tokio::test]
async fn test_child_continuations_run_in_child() {
    let dir = tempfile::tempdir().unwrap();
    let child_fail = dir.path().join("child-fail-runs");

    let config = project_with_agents(&[
        ("broken", "exit 1"),
        ("recorder", "echo ran >> \"$1\""),
    ]);
    let child = PipelineDef {
        name: "child".to_string(),
        steps: vec![agent_step("broken", "try", 1)],
        on_success: vec![],
        on_fail: vec![ActionSpec::AgentCall {
            prompt: child_fail.display().to_string(),
            agent: "recorder".to_string(),
            structured: false,
            retry: drover::core::RetryPolicy::new(1, 30),
        }],
    };
    let parent = pipeline("parent", vec![nested("child", &[], &[])]);
    let executor = executor_with(&config, vec![child, parent]);

    let result = run_in(&executor, "parent", dir.path()).await.unwrap();

    assert!(!result.success);
    assert_eq!(count_file(&child_fail), 1);
}

/// Unbounded recursion is refused instead of spinning forever
#[tokio::test]
async fn test_self_recursion_is_bounded() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("echo", "echo hi")]);
    let looping = pipeline("loop", vec![nested("loop", &[], &[])]);
    let executor = executor_with(&config, vec![looping]);

    let result = run_in(&executor, "loop", dir.path()).await;
    // Either surfaced as a fatal error or a failed run, but never a hang
    match result {
        Ok(result) => assert!(!result.success),
        Err(e) => assert!(e.to_string().contains("nesting")),
    }
}

/// Deep-but-bounded nesting works
#[tokio::test]
async fn test_two_level_nesting() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("echo", "echo \"$1\"")]);
    let leaf = pipeline("leaf", vec![agent_step("echo", "leaf ran", 1)]);
    let middle = pipeline("middle", vec![nested("leaf", &[], &[])]);
    let top = pipeline("top", vec![nested("middle", &[], &[])]);
    let executor = executor_with(&config, vec![leaf, middle, top]);

    let result = run_in(&executor, "top", dir.path()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.output.unwrap().stdout.trim(), "leaf ran");
}

/// Binding maps passed to the public entry point reach the templates
#[tokio::test]
async fn test_entry_point_bindings() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("echo", "echo \"$1\"")]);
    let executor = executor_with(
        &config,
        vec![pipeline("demo", vec![agent_step("echo", "task: {{ task }}", 1)])],
    );

    let result = executor
        .run(
            "demo",
            HashMap::from([("task".to_string(), "ship it".to_string())]),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.output.unwrap().stdout.trim(), "task: ship it");
}
