//! Validate steps: the validate → repair-on-failure → re-validate loop

use crate::helpers::*;

/// Fail once, repair, succeed: exactly 2 command runs and 1 repair
#[tokio::test]
async fn test_repair_then_revalidate() {
    let dir = tempfile::tempdir().unwrap();
    let cmd_counter = dir.path().join("cmd-runs");
    let repair_counter = dir.path().join("repair-runs");
    let marker = dir.path().join("fixed");

    // The command succeeds only once the marker exists; the repair agent
    // creates it (the marker path arrives as the repair prompt)
    let config = project_with_agents(&[(
        "fixer",
        &format!("echo repair >> \"{}\"; touch \"$1\"", repair_counter.display()),
    )]);
    let command = format!(
        "echo run >> \"{}\"; test -f \"{}\"",
        cmd_counter.display(),
        marker.display()
    );
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![validate_step(
                &command,
                &marker.display().to_string(),
                "fixer",
                3,
            )],
        )],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(result.success);
    assert_eq!(count_file(&cmd_counter), 2, "command: fail once, then pass");
    assert_eq!(count_file(&repair_counter), 1, "repair runs exactly once");
    // The returned output is the successful command's, never the repair's
    assert_eq!(result.trace.len(), 1);
    assert!(result.output.unwrap().success());
}

/// The repair prompt sees the failing output via `{{ output }}`
#[tokio::test]
async fn test_repair_prompt_sees_failing_output() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("seen-by-repair");
    let marker = dir.path().join("fixed");

    let config = project_with_agents(&[(
        "fixer",
        &format!(
            "printf '%s' \"$1\" > \"{}\"; touch \"{}\"",
            seen.display(),
            marker.display()
        ),
    )]);
    let command = format!(
        "test -f \"{}\" || {{ echo 'assertion blew up'; exit 1; }}",
        marker.display()
    );
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![validate_step(
                &command,
                "validation said: {{ output }}",
                "fixer",
                3,
            )],
        )],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(result.success);
    let prompt = std::fs::read_to_string(&seen).unwrap();
    assert!(prompt.contains("validation said:"));
    assert!(prompt.contains("assertion blew up"));
}

/// Exhausting the budget fails with the last command output, after
/// `max_attempts` command runs and one repair per intermediate failure
#[tokio::test]
async fn test_validate_exhaustion_counts() {
    let dir = tempfile::tempdir().unwrap();
    let cmd_counter = dir.path().join("cmd-runs");
    let repair_counter = dir.path().join("repair-runs");

    let config = project_with_agents(&[(
        "fixer",
        &format!("echo repair >> \"{}\"", repair_counter.display()),
    )]);
    let command = format!(
        "echo run >> \"{}\"; echo 'permanently broken' >&2; exit 7",
        cmd_counter.display()
    );
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![validate_step(&command, "fix it", "fixer", 3)],
        )],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(!result.success);
    assert_eq!(count_file(&cmd_counter), 3);
    assert_eq!(count_file(&repair_counter), 2, "no repair after the last attempt");
    let output = result.output.unwrap();
    assert_eq!(output.exit_code, Some(7));
    assert!(output.stderr.contains("permanently broken"));
}

/// A repair step that itself fails aborts the loop instead of retrying
#[tokio::test]
async fn test_repair_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cmd_counter = dir.path().join("cmd-runs");

    let config = project_with_agents(&[("fixer", "echo 'cannot fix' >&2; exit 1")]);
    let command = format!("echo run >> \"{}\"; exit 1", cmd_counter.display());
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![validate_step(&command, "fix it", "fixer", 5)],
        )],
    );

    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(!result.success);
    // The remaining validate attempts are skipped once the repair fails
    assert_eq!(count_file(&cmd_counter), 1);
    assert!(result.error.unwrap().contains("repair step failed"));
}

/// A timed-out command counts as a failed attempt and keeps partial output
#[tokio::test]
async fn test_validate_timeout_is_a_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();

    let config = project_with_agents(&[("fixer", "true")]);
    let executor = executor_with(
        &config,
        vec![pipeline(
            "demo",
            vec![drover::core::ActionSpec::Validate {
                command: "echo started; sleep 30".to_string(),
                repair_prompt: "fix it".to_string(),
                agent: "fixer".to_string(),
                retry: drover::core::RetryPolicy::new(1, 1),
            }],
        )],
    );

    let start = std::time::Instant::now();
    let result = run_in(&executor, "demo", dir.path()).await.unwrap();

    assert!(!result.success);
    assert!(start.elapsed() < std::time::Duration::from_secs(15));
    let output = result.output.unwrap();
    assert!(output.timed_out);
    assert!(output.stdout.contains("started"));
}
