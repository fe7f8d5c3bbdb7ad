//! Structured mode: JSON object demanded, parsed, and retried on garbage

use crate::helpers::*;

/// Valid JSON output is parsed into the structured payload
#[tokio::test]
async fn test_structured_payload_is_parsed() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[(
        "json",
        r#"echo '{"verdict": "ship", "confidence": 9}'"#,
    )]);
    let executor = executor_with(
        &config,
        vec![pipeline("demo", vec![structured_step("json", "assess", 1)])],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(result.success);
    let output = result.output.unwrap();
    let structured = output.structured.unwrap();
    assert_eq!(structured["verdict"], "ship");
    assert_eq!(structured["confidence"], 9);
}

/// The structured demand is appended to the prompt the agent receives
#[tokio::test]
async fn test_structured_instruction_reaches_agent() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("prompt");

    let config = project_with_agents(&[(
        "json",
        &format!(
            "printf '%s' \"$1\" > \"{}\"; echo '{{\"ok\": true}}'",
            seen.display()
        ),
    )]);
    let executor = executor_with(
        &config,
        vec![pipeline("demo", vec![structured_step("json", "assess", 1)])],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();
    assert!(result.success);

    let prompt = std::fs::read_to_string(&seen).unwrap();
    assert!(prompt.starts_with("assess"));
    assert!(prompt.contains("JSON object"));
}

/// Unparseable output consumes an attempt even with a zero exit code
#[tokio::test]
async fn test_parse_failure_consumes_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("attempts");

    let config = project_with_agents(&[(
        "chatty",
        "echo attempt >> \"$1\"; echo 'sure, here is some prose'",
    )]);
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![structured_step("chatty", &counter.display().to_string(), 2)],
        )],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(!result.success);
    assert_eq!(count_file(&counter), 2);
}

/// A JSON array is not a structured payload; only objects count
#[tokio::test]
async fn test_non_object_json_is_a_parse_failure() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("list", "echo '[1, 2, 3]'")]);
    let executor = executor_with(
        &config,
        vec![pipeline("demo", vec![structured_step("list", "assess", 1)])],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();
    assert!(!result.success);
}

/// Scalar fields of a structured payload become context variables
#[tokio::test]
async fn test_structured_fields_feed_later_steps() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[
        ("json", r#"echo '{"branch": "fix/timeout"}'"#),
        ("echo", "echo \"$1\""),
    ]);
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![
                structured_step("json", "pick a branch", 1),
                agent_step("echo", "checking out {{ branch }}", 1),
            ],
        )],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(result.success);
    assert_eq!(
        result.output.unwrap().stdout.trim(),
        "checking out fix/timeout"
    );
}
