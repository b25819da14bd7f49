//! Runs one shell command as root through `sudo` on a pseudo-terminal.
//!
//! The password is written to the terminal when sudo asks for it, never
//! passed on a command line or through the environment. Output is streamed
//! as [`RunnerEvent`]s; the command can be answered interactively with
//! [`RunningCommand::send_input`] and stopped with [`RunningCommand::cancel`].
//!
//! Event order for every run: one `Started`, any number of `Output`, then
//! exactly one `Finished` after the last output.

mod filter;
mod pty;

pub use filter::{Filtered, OutputFilter};

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::AppConfig;

/// Prompt passed to `sudo -p`, so it can be recognized and removed.
pub const SUDO_PROMPT: &str = "[sudo] password: ";

/// Lowercased messages sudo prints when it rejects a password.
const REJECTION_SIGNATURES: &[&str] = &["incorrect password", "sorry, try again"];

const POLL_INTERVAL_MS: libc::c_int = 100;
const KILL_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("A password is required")]
    EmptyCredential,

    #[error("Failed to open pseudo-terminal: {0}")]
    Pty(#[source] io::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command is not running")]
    NotRunning,

    #[error("Runner stopped without reporting an outcome")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Must accept `-S` (password on stdin) and `-p <prompt>` like sudo.
    pub sudo_program: String,
    /// Time between SIGTERM and SIGKILL on cancel.
    pub terminate_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sudo_program: "sudo".to_string(),
            terminate_grace: Duration::from_secs(2),
        }
    }
}

impl From<&AppConfig> for RunnerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            sudo_program: config.sudo_program.clone(),
            terminate_grace: config.terminate_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Started,
    /// Filtered terminal output. Not necessarily whole lines.
    Output(String),
    Finished(RunOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// sudo did not accept the password. Worth asking again.
    CredentialRejected,
    Failed {
        code: Option<i32>,
        signal: Option<i32>,
        output: String,
    },
}

impl RunOutcome {
    /// Success only for a normal exit with status 0, whatever the output
    /// says. `rejected` reports whether sudo turned the password down before
    /// the command started.
    pub fn classify(
        code: Option<i32>,
        signal: Option<i32>,
        rejected: bool,
        output: String,
    ) -> Self {
        if code == Some(0) && signal.is_none() {
            return Self::Success;
        }
        if rejected {
            return Self::CredentialRejected;
        }
        Self::Failed {
            code,
            signal,
            output,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CredentialRejected)
    }
}

fn contains_rejection(text: &str) -> bool {
    let lower = text.to_lowercase();
    REJECTION_SIGNATURES.iter().any(|s| lower.contains(s))
}

/// Output that is neither blank nor a sudo rejection comes from the command.
fn ends_authentication(text: &str) -> bool {
    text.lines()
        .any(|line| !line.trim().is_empty() && !contains_rejection(line))
}

/// A command waiting to be run. Each [`PrivilegedRunner::start`] creates a
/// separate process; a rejected password means starting again.
#[derive(Debug, Clone)]
pub struct PrivilegedRunner {
    command: String,
    description: String,
    config: RunnerConfig,
}

impl PrivilegedRunner {
    pub fn new(
        command: impl Into<String>,
        description: impl Into<String>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            config,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn start(&self, password: &str) -> Result<RunningCommand, RunnerError> {
        if password.is_empty() {
            return Err(RunnerError::EmptyCredential);
        }

        let pty = pty::open().map_err(RunnerError::Pty)?;

        let mut command = Command::new(&self.config.sudo_program);
        command
            .arg("-S")
            .arg("-p")
            .arg(SUDO_PROMPT)
            .arg("bash")
            .arg("-c")
            .arg(&self.command);

        let pid = pty::spawn(&mut command, &pty.slave).map_err(|source| RunnerError::Spawn {
            program: self.config.sudo_program.clone(),
            source,
        })?;
        // Only the child may hold the slave, or reads never see EOF.
        drop(pty.slave);

        tracing::info!("Started '{}' (pid {})", self.description, pid);
        tracing::debug!("Command: {}", self.command);

        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(RunnerEvent::Started);

        let reader_file = pty.master.try_clone()?;
        let input = Arc::new(Mutex::new(pty.master));
        let exited = Arc::new(AtomicBool::new(false));

        let reader = {
            let session = ReaderSession {
                file: reader_file,
                input: input.clone(),
                password: password.to_string(),
                pid,
                exited: exited.clone(),
                tx: tx.clone(),
            };
            thread::spawn(move || session.run())
        };

        {
            let exited = exited.clone();
            let description = self.description.clone();
            thread::spawn(move || {
                let (code, signal) = pty::wait_pid(pid);
                exited.store(true, Ordering::SeqCst);
                let transcript = reader.join().unwrap_or_default();
                let outcome =
                    RunOutcome::classify(code, signal, transcript.rejected, transcript.output);
                tracing::info!("'{}' finished: {}", description, outcome_label(&outcome));
                let _ = tx.send(RunnerEvent::Finished(outcome));
            });
        }

        Ok(RunningCommand {
            pid,
            input,
            exited,
            events,
            grace: self.config.terminate_grace,
        })
    }

    /// Start the command and wait for it, passing each piece of output to
    /// `on_output`.
    pub async fn run_to_completion<F>(
        &self,
        password: &str,
        mut on_output: F,
    ) -> Result<RunOutcome, RunnerError>
    where
        F: FnMut(&str),
    {
        let mut running = self.start(password)?;
        while let Some(event) = running.next_event().await {
            match event {
                RunnerEvent::Started => {}
                RunnerEvent::Output(text) => on_output(&text),
                RunnerEvent::Finished(outcome) => return Ok(outcome),
            }
        }
        Err(RunnerError::Disconnected)
    }
}

fn outcome_label(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Success => "success".to_string(),
        RunOutcome::CredentialRejected => "password rejected".to_string(),
        RunOutcome::Failed { code, signal, .. } => {
            format!("failed (code {:?}, signal {:?})", code, signal)
        }
    }
}

/// A started command. Dropping it terminates the process if it is still
/// running.
pub struct RunningCommand {
    pid: libc::pid_t,
    input: Arc<Mutex<File>>,
    exited: Arc<AtomicBool>,
    events: UnboundedReceiver<RunnerEvent>,
    grace: Duration,
}

impl RunningCommand {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    /// `None` once `Finished` has been delivered.
    pub async fn next_event(&mut self) -> Option<RunnerEvent> {
        self.events.recv().await
    }

    /// Wait for the outcome, discarding output.
    pub async fn wait(mut self) -> Result<RunOutcome, RunnerError> {
        while let Some(event) = self.next_event().await {
            if let RunnerEvent::Finished(outcome) = event {
                return Ok(outcome);
            }
        }
        Err(RunnerError::Disconnected)
    }

    /// Type `text` followed by Enter into the command's terminal.
    pub fn send_input(&self, text: &str) -> Result<(), RunnerError> {
        if !self.is_running() {
            return Err(RunnerError::NotRunning);
        }
        let mut input = self.input.lock().expect("pty input lock poisoned");
        input.write_all(format!("{}\n", text).as_bytes())?;
        input.flush()?;
        Ok(())
    }

    /// SIGTERM, then SIGKILL if the process outlives the grace period.
    /// Returns once the process has been reaped, or after the kill wait
    /// expires. Blocks the calling thread; use [`RunningCommand::terminate`]
    /// from async code.
    pub fn cancel(&mut self) {
        if !self.send_term() {
            return;
        }
        if wait_for(&self.exited, self.grace) {
            return;
        }
        self.send_kill();
        if !wait_for(&self.exited, KILL_WAIT) {
            tracing::error!("pid {} still running after SIGKILL", self.pid);
        }
    }

    /// [`RunningCommand::cancel`] without blocking the runtime. `Finished`
    /// still arrives through [`RunningCommand::next_event`].
    pub async fn terminate(&mut self) {
        if !self.send_term() {
            return;
        }
        if wait_for_async(&self.exited, self.grace).await {
            return;
        }
        self.send_kill();
        if !wait_for_async(&self.exited, KILL_WAIT).await {
            tracing::error!("pid {} still running after SIGKILL", self.pid);
        }
    }

    fn send_term(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        // The child leads its own session, so `-pid` is its process group
        tracing::info!("Terminating pid {}", self.pid);
        pty::signal(-self.pid, libc::SIGTERM);
        true
    }

    fn send_kill(&self) {
        tracing::warn!("pid {} ignored SIGTERM, killing", self.pid);
        pty::signal(-self.pid, libc::SIGKILL);
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        self.cancel();
    }
}

const EXIT_POLL: Duration = Duration::from_millis(20);

fn wait_for(flag: &AtomicBool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        thread::sleep(EXIT_POLL);
    }
    flag.load(Ordering::SeqCst)
}

async fn wait_for_async(flag: &AtomicBool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
    flag.load(Ordering::SeqCst)
}

/// State owned by the thread that reads the terminal.
struct ReaderSession {
    file: File,
    input: Arc<Mutex<File>>,
    password: String,
    pid: libc::pid_t,
    exited: Arc<AtomicBool>,
    tx: UnboundedSender<RunnerEvent>,
}

/// What the reader saw over the whole run.
#[derive(Debug, Default)]
struct Transcript {
    /// All text sent as output.
    output: String,
    /// sudo asked twice, or printed a rejection before the command produced
    /// any output of its own.
    rejected: bool,
}

/// Collects output while sudo is still authenticating. Authentication ends
/// with the first output that is neither blank nor a rejection message and
/// does not come with a prompt.
#[derive(Debug)]
struct AuthWatch {
    active: bool,
    text: String,
}

impl Default for AuthWatch {
    fn default() -> Self {
        Self {
            active: true,
            text: String::new(),
        }
    }
}

impl AuthWatch {
    fn observe(&mut self, text: &str, prompts: usize) {
        if !self.active {
            return;
        }
        self.text.push_str(text);
        if prompts == 0 && ends_authentication(text) {
            self.active = false;
        }
    }

    fn saw_rejection(&self) -> bool {
        contains_rejection(&self.text)
    }
}

impl ReaderSession {
    /// Read until the terminal closes, or until the process has exited and
    /// nothing more arrives.
    ///
    /// Until the first line that is not a sudo rejection message, output is
    /// treated as part of authentication. After that it belongs to the
    /// command and its content never decides the outcome.
    fn run(mut self) -> Transcript {
        let mut filter = OutputFilter::new(SUDO_PROMPT);
        let mut captured = String::new();
        let mut auth = AuthWatch::default();
        let mut reprompted = false;
        let mut prompts_seen = 0;
        let mut stopping = false;
        let mut buf = [0u8; 4096];
        let fd = self.file.as_raw_fd();

        loop {
            match pty::wait_readable(fd, POLL_INTERVAL_MS) {
                Ok(true) => match self.file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let out = filter.push(&buf[..n]);
                        auth.observe(&out.text, out.prompts);
                        self.emit(&mut captured, out.text);

                        if stopping {
                            continue;
                        }
                        prompts_seen += out.prompts;
                        if prompts_seen > 1 {
                            stopping = true;
                            reprompted = true;
                            self.reject();
                        } else if out.prompts == 1 {
                            self.answer_prompt();
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    // EIO once the last slave descriptor closes
                    Err(_) => break,
                },
                Ok(false) => {
                    if self.exited.load(Ordering::SeqCst) {
                        break;
                    }
                    let partial = filter.flush_partial();
                    auth.observe(&partial, 0);
                    self.emit(&mut captured, partial);
                }
                Err(e) => {
                    tracing::warn!("Polling the terminal failed: {}", e);
                    break;
                }
            }
        }

        let rest = filter.finish();
        auth.observe(&rest, 0);
        self.emit(&mut captured, rest);
        Transcript {
            output: captured,
            rejected: reprompted || auth.saw_rejection(),
        }
    }

    fn emit(&self, captured: &mut String, text: String) {
        if text.is_empty() {
            return;
        }
        captured.push_str(&text);
        let _ = self.tx.send(RunnerEvent::Output(text));
    }

    fn answer_prompt(&self) {
        let mut input = self.input.lock().expect("pty input lock poisoned");
        let written = input
            .write_all(format!("{}\n", self.password).as_bytes())
            .and_then(|_| input.flush());
        if let Err(e) = written {
            tracing::warn!("Failed to send password: {}", e);
        }
    }

    /// sudo is asking again on the same terminal. Stop it instead.
    fn reject(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!("Password rejected, stopping pid {}", self.pid);
        pty::signal(self.pid, libc::SIGTERM);
    }
}
