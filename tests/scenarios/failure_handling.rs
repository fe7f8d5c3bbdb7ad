//! Failure branching: continuation lists and their one-shot semantics

use crate::helpers::*;
use drover::core::{ActionSpec, PipelineDef, RetryPolicy};
use drover::execution::PipelineError;

fn marker_step(agent: &str, prompt: String) -> ActionSpec {
    ActionSpec::AgentCall {
        prompt,
        agent: agent.to_string(),
        structured: false,
        retry: RetryPolicy::new(1, 30),
    }
}

/// Steps [A succeeds, B exhausts]: trace of length 2, overall failure,
/// fail continuation exactly once, success continuation never
#[tokio::test]
async fn test_fail_continuation_runs_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let fail_counter = dir.path().join("fail-runs");
    let success_counter = dir.path().join("success-runs");

    let config = project_with_agents(&[
        ("ok", "echo fine"),
        ("broken", "echo 'step B says no' >&2; exit 1"),
        ("recorder", "echo ran >> \"$1\""),
    ]);

    let def = PipelineDef {
        name: "demo".to_string(),
        steps: vec![
            agent_step("ok", "step A", 1),
            agent_step("broken", "step B", 2),
        ],
        on_success: vec![marker_step("recorder", success_counter.display().to_string())],
        on_fail: vec![marker_step("recorder", fail_counter.display().to_string())],
    };
    let executor = executor_with(&config, vec![def]);

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.trace.len(), 2);
    assert_eq!(count_file(&fail_counter), 1);
    assert_eq!(count_file(&success_counter), 0);
    assert_eq!(result.failed_step.as_deref(), Some("agent:broken"));
}

/// The fail continuation can reference the failing output
#[tokio::test]
async fn test_fail_continuation_sees_failing_output() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("seen");

    let config = project_with_agents(&[
        ("broken", "echo 'the build fell over'; exit 1"),
        (
            "reporter",
            &format!("printf '%s' \"$1\" > \"{}\"", seen.display()),
        ),
    ]);

    let def = PipelineDef {
        name: "demo".to_string(),
        steps: vec![agent_step("broken", "build", 1)],
        on_success: vec![],
        on_fail: vec![marker_step("reporter", "failure was: {{ output }}".to_string())],
    };
    let executor = executor_with(&config, vec![def]);

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();
    assert!(!result.success);

    let report = std::fs::read_to_string(&seen).unwrap();
    assert!(report.contains("the build fell over"));
}

/// The success continuation runs after a clean pass
#[tokio::test]
async fn test_success_continuation_runs() {
    let dir = tempfile::tempdir().unwrap();
    let success_counter = dir.path().join("success-runs");

    let config = project_with_agents(&[("ok", "echo fine"), ("recorder", "echo ran >> \"$1\"")]);
    let def = PipelineDef {
        name: "demo".to_string(),
        steps: vec![agent_step("ok", "step A", 1)],
        on_success: vec![marker_step("recorder", success_counter.display().to_string())],
        on_fail: vec![],
    };
    let executor = executor_with(&config, vec![def]);

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(result.success);
    assert_eq!(count_file(&success_counter), 1);
    // Continuation outputs stay out of the main trace
    assert_eq!(result.trace.len(), 1);
}

/// A failing continuation is terminal and never triggers the other list
#[tokio::test]
async fn test_failing_continuation_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let fail_counter = dir.path().join("fail-runs");

    let config = project_with_agents(&[
        ("ok", "echo fine"),
        ("broken", "exit 1"),
        ("recorder", "echo ran >> \"$1\""),
    ]);
    let def = PipelineDef {
        name: "demo".to_string(),
        steps: vec![agent_step("ok", "step A", 1)],
        on_success: vec![agent_step("broken", "post-step", 1)],
        on_fail: vec![marker_step("recorder", fail_counter.display().to_string())],
    };
    let executor = executor_with(&config, vec![def]);

    let err = run_in(&executor, "demo", dir.path()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ContinuationFailed { branch: "success", .. }
    ));
    // The fail list is not a fallback for continuation failures
    assert_eq!(count_file(&fail_counter), 0);
}

/// An unknown agent fails the step before any attempt
#[tokio::test]
async fn test_unknown_agent_fails_without_attempt() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("ok", "echo fine")]);
    let executor = executor_with(
        &config,
        vec![pipeline("demo", vec![agent_step("ghost", "hello", 3)])],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(!result.success);
    assert!(result.trace.is_empty());
    assert!(result.error.unwrap().contains("unknown agent"));
}
