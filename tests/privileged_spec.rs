//! Privileged runner tests.
//!
//! A shell script stands in for sudo. It prints the prompt it was given,
//! accepts the password "secret", and otherwise complains and asks again the
//! way sudo does.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use archmaster::privileged::{
    PrivilegedRunner, RunOutcome, RunnerConfig, RunnerError, RunnerEvent, RunningCommand,
};
use tempfile::TempDir;

const FAKE_SUDO: &str = r#"#!/bin/sh
# fake-sudo -S -p PROMPT bash -c COMMAND
prompt="$3"
shift 3
printf '%s' "$prompt"
IFS= read -r password
if [ "$password" != "secret" ]; then
    echo "Sorry, try again."
    printf '%s' "$prompt"
    IFS= read -r password
    echo "sudo: 2 incorrect password attempts"
    exit 1
fi
exec "$@"
"#;

struct Harness {
    dir: TempDir,
    program: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let program = dir.path().join("fake-sudo");
        fs::write(&program, FAKE_SUDO).expect("Failed to write fake sudo");
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake sudo executable");
        Self { dir, program }
    }

    /// Where commands write the pid of a background child.
    fn pid_file(&self) -> PathBuf {
        self.dir.path().join("child.pid")
    }

    fn child_pid(&self) -> libc::pid_t {
        fs::read_to_string(self.pid_file())
            .expect("Failed to read child pid")
            .trim()
            .parse()
            .expect("Child pid is not a number")
    }

    fn runner(&self, command: &str) -> PrivilegedRunner {
        PrivilegedRunner::new(
            command,
            "test command",
            RunnerConfig {
                sudo_program: self.program.display().to_string(),
                terminate_grace: Duration::from_millis(500),
            },
        )
    }
}

/// Start, retrying while another test thread's fork still holds the freshly
/// written script open for writing.
fn start(runner: &PrivilegedRunner, password: &str) -> RunningCommand {
    for _ in 0..20 {
        match runner.start(password) {
            Ok(running) => return running,
            Err(RunnerError::Spawn { source, .. }) if source.raw_os_error() == Some(libc::ETXTBSY) => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => panic!("Failed to start: {}", e),
        }
    }
    panic!("fake sudo stayed busy")
}

/// Every event until the channel closes, with a timeout so a hung runner
/// fails the test instead of blocking it.
async fn drain(running: &mut RunningCommand) -> Vec<RunnerEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), running.next_event()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("runner did not finish; events so far: {:?}", events),
        }
    }
}

fn output_of(events: &[RunnerEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            RunnerEvent::Output(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn outcome_of(events: &[RunnerEvent]) -> RunOutcome {
    match events.last() {
        Some(RunnerEvent::Finished(outcome)) => outcome.clone(),
        other => panic!("expected Finished last, got {:?}", other),
    }
}

/// Wait for output containing `needle`, returning everything read so far.
async fn wait_for_output(running: &mut RunningCommand, needle: &str) -> String {
    let mut seen = String::new();
    while !seen.contains(needle) {
        match tokio::time::timeout(Duration::from_secs(10), running.next_event()).await {
            Ok(Some(RunnerEvent::Output(text))) => seen.push_str(&text),
            Ok(Some(RunnerEvent::Started)) => {}
            Ok(other) => panic!("finished before {:?} appeared: {:?} ({})", needle, other, seen),
            Err(_) => panic!("timed out waiting for {:?}; output so far: {}", needle, seen),
        }
    }
    seen
}

/// Running or stopped, but not a zombie waiting to be reaped.
fn process_alive(pid: libc::pid_t) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state follows the parenthesized command name
        Ok(stat) => stat
            .rsplit_once(") ")
            .map(|(_, rest)| !rest.starts_with('Z') && !rest.starts_with('X'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Orphaned children are reaped by init, which may take a moment.
async fn eventually_gone(pid: libc::pid_t) -> bool {
    for _ in 0..50 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Runs `sleep 30` in the background, records its pid, then waits on it.
fn background_sleep(harness: &Harness, before: &str) -> String {
    format!(
        "{} sleep 30 & echo $! > '{}'; echo started; wait; echo finished",
        before,
        harness.pid_file().display()
    )
}

mod outcomes {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_exit_zero() {
        let harness = Harness::new();
        let mut running = start(&harness.runner("echo hello; echo warning >&2"), "secret");

        let events = drain(&mut running).await;

        assert_eq!(events.first(), Some(&RunnerEvent::Started));
        assert_eq!(outcome_of(&events), RunOutcome::Success);
        let output = output_of(&events);
        assert!(output.contains("hello\n"));
        assert!(output.contains("warning\n"));
    }

    #[tokio::test]
    async fn never_shows_the_prompt_or_password() {
        let harness = Harness::new();
        let mut running = start(&harness.runner("echo done"), "secret");

        let output = output_of(&drain(&mut running).await);

        assert!(!output.contains("secret"));
        assert!(!output.contains("[sudo]"));
        assert_eq!(output, "done\n");
    }

    #[tokio::test]
    async fn reports_a_rejected_password_as_retryable() {
        let harness = Harness::new();
        let mut running = start(&harness.runner("echo should-not-run"), "wrong");

        let events = drain(&mut running).await;
        let outcome = outcome_of(&events);

        assert_eq!(outcome, RunOutcome::CredentialRejected);
        assert!(outcome.is_retryable());
        assert!(!output_of(&events).contains("should-not-run"));
    }

    #[tokio::test]
    async fn command_output_that_looks_like_a_rejection_is_not_one() {
        let harness = Harness::new();
        let mut running = start(
            &harness.runner("echo 'gpg: Sorry, try again.'; sleep 1; echo done; exit 0"),
            "secret",
        );

        let events = drain(&mut running).await;

        assert_eq!(outcome_of(&events), RunOutcome::Success);
        assert_eq!(output_of(&events), "gpg: Sorry, try again.\ndone\n");
    }

    #[tokio::test]
    async fn later_failure_mentioning_incorrect_password_is_a_plain_failure() {
        let harness = Harness::new();
        let mut running = start(
            &harness.runner("echo 'checking keys'; echo 'signature check: incorrect password for key'; exit 1"),
            "secret",
        );

        match outcome_of(&drain(&mut running).await) {
            RunOutcome::Failed { code, .. } => assert_eq!(code, Some(1)),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn keeps_output_of_a_failed_command() {
        let harness = Harness::new();
        let mut running = start(&harness.runner("echo 'error: target not found: nope'; exit 3"), "secret");

        match outcome_of(&drain(&mut running).await) {
            RunOutcome::Failed { code, signal, output } => {
                assert_eq!(code, Some(3));
                assert_eq!(signal, None);
                assert!(output.contains("error: target not found: nope"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn strips_terminal_escapes_from_output() {
        let harness = Harness::new();
        let command = r"printf '\033[1;34m::\033[0m Synchronizing\n 50%%\r100%%\n'";
        let mut running = start(&harness.runner(command), "secret");

        let output = output_of(&drain(&mut running).await);

        assert_eq!(output, ":: Synchronizing\n100%\n");
    }

    #[tokio::test]
    async fn run_to_completion_streams_output() {
        let harness = Harness::new();
        let runner = harness.runner("echo one; echo two");

        let mut seen = String::new();
        let outcome = loop {
            match runner.run_to_completion("secret", |text| seen.push_str(text)).await {
                Err(RunnerError::Spawn { source, .. }) if source.raw_os_error() == Some(libc::ETXTBSY) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                result => break result.expect("Run failed"),
            }
        };

        assert!(outcome.is_success());
        assert_eq!(seen, "one\ntwo\n");
    }

    #[test]
    fn refuses_an_empty_password() {
        let harness = Harness::new();
        assert!(matches!(
            harness.runner("true").start(""),
            Err(RunnerError::EmptyCredential)
        ));
    }
}

mod interaction {
    use super::*;

    #[tokio::test]
    async fn forwards_input_to_the_command() {
        let harness = Harness::new();
        let mut running = start(
            &harness.runner(r#"echo ready; read -r answer; echo "got $answer""#),
            "secret",
        );

        wait_for_output(&mut running, "ready").await;
        running.send_input("y").expect("Send failed");

        let events = drain(&mut running).await;
        assert!(output_of(&events).contains("got y\n"));
        assert_eq!(outcome_of(&events), RunOutcome::Success);
    }

    #[tokio::test]
    async fn refuses_input_after_exit() {
        let harness = Harness::new();
        let mut running = start(&harness.runner("true"), "secret");

        drain(&mut running).await;

        assert!(!running.is_running());
        assert!(matches!(running.send_input("y"), Err(RunnerError::NotRunning)));
    }
}

mod teardown {
    use super::*;

    #[tokio::test]
    async fn cancel_leaves_no_process_behind() {
        let harness = Harness::new();
        let mut running = start(&harness.runner(&background_sleep(&harness, "")), "secret");
        let pid = running.pid();

        wait_for_output(&mut running, "started").await;
        let child = harness.child_pid();
        assert!(process_alive(child));

        running.cancel();

        assert!(!running.is_running());
        assert!(!process_alive(pid));
        assert!(eventually_gone(child).await, "sleep {} survived cancel", child);
        match outcome_of(&drain(&mut running).await) {
            RunOutcome::Failed { signal, .. } => assert_eq!(signal, Some(libc::SIGTERM)),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn kills_a_command_that_ignores_sigterm() {
        let harness = Harness::new();
        let mut running = start(
            &harness.runner(&background_sleep(&harness, "trap '' TERM;")),
            "secret",
        );
        let pid = running.pid();

        wait_for_output(&mut running, "started").await;
        let child = harness.child_pid();
        running.cancel();

        assert!(!running.is_running());
        assert!(!process_alive(pid));
        assert!(eventually_gone(child).await, "sleep {} survived SIGKILL", child);
        assert!(!output_of(&drain(&mut running).await).contains("finished"));
    }

    #[tokio::test]
    async fn terminate_reports_the_signal_through_events() {
        let harness = Harness::new();
        let mut running = start(&harness.runner(&background_sleep(&harness, "")), "secret");

        wait_for_output(&mut running, "started").await;
        let child = harness.child_pid();
        running.terminate().await;

        assert!(!running.is_running());
        assert!(eventually_gone(child).await);
        match outcome_of(&drain(&mut running).await) {
            RunOutcome::Failed { signal, .. } => assert_eq!(signal, Some(libc::SIGTERM)),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropping_a_running_command_stops_it() {
        let harness = Harness::new();
        let mut running = start(&harness.runner(&background_sleep(&harness, "")), "secret");
        let pid = running.pid();

        wait_for_output(&mut running, "started").await;
        let child = harness.child_pid();
        drop(running);

        assert!(!process_alive(pid));
        assert!(eventually_gone(child).await, "sleep {} survived drop", child);
    }
}
