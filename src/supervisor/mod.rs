//! Interactive process supervision
//!
//! Keeps a spawned terminal program live on screen while letting the
//! operator inject named, pre-scripted interactions at any point. One
//! session owns one process; the mirror task and the key watcher are the
//! only concurrent activities against it.

pub mod action;
pub mod session;

pub use action::{load_actions, ActionScript, InteractiveAction, ScriptStep};
pub use session::{ProcessSession, SessionError, Transcript};

use anyhow::{bail, Context, Result};
use console::{style, Key, Term};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Default action-menu shortcut: Ctrl-A
pub const DEFAULT_SHORTCUT: char = '\u{1}';

/// Parse a shortcut spec: `ctrl-a` style, or a single literal character
pub fn parse_shortcut(spec: &str) -> Result<char> {
    let lower = spec.to_ascii_lowercase();
    if let Some(letter) = lower.strip_prefix("ctrl-").or_else(|| lower.strip_prefix("^")) {
        let mut chars = letter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                return Ok(((c.to_ascii_uppercase() as u8) & 0x1f) as char);
            }
            _ => bail!("invalid shortcut '{}': expected ctrl-<letter>", spec),
        }
    }
    let mut chars = spec.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => bail!("invalid shortcut '{}': expected a single character", spec),
    }
}

/// A started process under supervision
pub struct SupervisedProcess {
    session: Arc<ProcessSession>,
    exit: watch::Receiver<Option<i32>>,
}

impl SupervisedProcess {
    pub fn session(&self) -> Arc<ProcessSession> {
        self.session.clone()
    }

    /// Wait until the process exits; returns its exit code if it had one
    pub async fn wait(&mut self) -> Option<i32> {
        while self.exit.borrow().is_none() {
            if self.exit.changed().await.is_err() {
                break;
            }
        }
        *self.exit.borrow()
    }
}

/// Spawns processes and runs the operator's foreground loop
pub struct Supervisor {
    actions: Vec<Arc<dyn InteractiveAction>>,
    shortcut: char,
    mirror: bool,
}

impl Supervisor {
    pub fn new(actions: Vec<Arc<dyn InteractiveAction>>, shortcut: char) -> Self {
        Self {
            actions,
            shortcut,
            mirror: true,
        }
    }

    /// Disable mirroring to the operator's terminal (used by tests)
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Spawn `command` and begin mirroring its output into the transcript
    ///
    /// The returned session is usable until the process exits, whether or
    /// not the interactive loop is running.
    pub fn start(&self, command: &[String], cwd: &Path) -> Result<SupervisedProcess> {
        if command.is_empty() {
            bail!("no command given");
        }

        debug!(command = %command.join(" "), "starting supervised process");
        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start '{}'", command.join(" ")))?;

        let stdin = child.stdin.take();
        let pid = child.id();
        let session = Arc::new(ProcessSession::new(stdin, pid));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = mirror_stream(stdout, session.clone(), self.mirror, false);
        let err_task = mirror_stream(stderr, session.clone(), self.mirror, true);

        let (exit_tx, exit_rx) = watch::channel(None);
        let watcher_session = session.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            // Let the mirror tasks drain whatever is left in the pipes
            // before declaring the session closed
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }
            watcher_session.mark_closed();
            let code = status.ok().and_then(|s| s.code());
            info!(?code, "supervised process exited");
            let _ = exit_tx.send(Some(code.unwrap_or(-1)));
        });

        Ok(SupervisedProcess {
            session,
            exit: exit_rx,
        })
    }

    /// Run the blocking foreground loop until the process exits
    ///
    /// Operator keys pass through to the process; the shortcut key suspends
    /// pass-through, shows the action menu, dispatches at most one action,
    /// then resumes.
    pub async fn interact(&self, process: &mut SupervisedProcess) -> Result<i32> {
        let term = Term::stdout();
        let mut keys = watch_keys();
        let session = process.session();

        loop {
            tokio::select! {
                changed = process.exit.changed() => {
                    if changed.is_err() || process.exit.borrow().is_some() {
                        break;
                    }
                }
                key = keys.recv() => {
                    match key {
                        Some(Key::Char(c)) if c == self.shortcut => {
                            self.run_action_menu(&term, &session, &mut keys).await;
                        }
                        Some(key) => forward_key(&session, key).await,
                        None => {
                            // No terminal to read from; wait for exit only
                            let _ = process.exit.changed().await;
                            break;
                        }
                    }
                }
            }
        }

        let code = process.exit.borrow().unwrap_or(-1);
        Ok(code)
    }

    /// Present the registered actions and dispatch the selected one
    async fn run_action_menu(
        &self,
        term: &Term,
        session: &Arc<ProcessSession>,
        keys: &mut mpsc::UnboundedReceiver<Key>,
    ) {
        if self.actions.is_empty() {
            let _ = term.write_line("\nno actions registered");
            return;
        }

        let _ = term.write_line("");
        let _ = term.write_line("Available actions:");
        for (i, action) in self.actions.iter().enumerate() {
            let _ = term.write_line(&format!("  {}. {}", i + 1, style(action.name()).bold()));
        }
        let _ = term.write_str("Select an action (number, empty cancels): ");

        let Some(index) = read_selection(term, keys).await else {
            let _ = term.write_line(&style("cancelled").dim().to_string());
            return;
        };
        let Some(action) = self.actions.get(index) else {
            let _ = term.write_line(&style("invalid selection").red().to_string());
            return;
        };

        info!(action = %action.name(), "dispatching action");
        match action.execute(session).await {
            Ok(true) => {
                let _ = term.write_line(&format!("{} {}", style("done:").green(), action.name()));
            }
            Ok(false) => {
                let _ = term.write_line(
                    &style("action gave up waiting for expected output")
                        .yellow()
                        .to_string(),
                );
            }
            Err(e) => {
                warn!(action = %action.name(), err = %e, "action failed");
                let _ = term.write_line(&format!("{} {}", style("action failed:").red(), e));
            }
        }
    }
}

/// Read keys from the operator's terminal on a blocking thread
///
/// The channel closes immediately when stdin is not a terminal, which
/// degrades `interact` to exit-waiting only.
fn watch_keys() -> mpsc::UnboundedReceiver<Key> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let term = Term::stdout();
        if !term.is_term() {
            return;
        }
        loop {
            match term.read_key() {
                Ok(key) => {
                    if tx.send(key).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// Collect a numeric menu selection from the key stream
async fn read_selection(
    term: &Term,
    keys: &mut mpsc::UnboundedReceiver<Key>,
) -> Option<usize> {
    let mut entry = String::new();
    loop {
        match keys.recv().await? {
            Key::Enter => break,
            Key::Escape => return None,
            Key::Char(c) if c.is_ascii_digit() => {
                entry.push(c);
                let _ = term.write_str(&c.to_string());
            }
            Key::Backspace => {
                if entry.pop().is_some() {
                    let _ = term.clear_chars(1);
                }
            }
            _ => {}
        }
    }
    let _ = term.write_line("");
    let selected: usize = entry.trim().parse().ok()?;
    selected.checked_sub(1)
}

/// Forward one operator key to the process
async fn forward_key(session: &Arc<ProcessSession>, key: Key) {
    let bytes: &str = match &key {
        Key::Char('\u{3}') | Key::CtrlC => {
            // Interrupt goes to the whole process group, like the terminal
            // would deliver it
            #[cfg(unix)]
            if let Some(pid) = session.pid() {
                crate::execution::process::signal_group(pid, libc::SIGINT);
                return;
            }
            "\x03"
        }
        Key::Char(c) => {
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            if let Err(e) = session.send_input(s).await {
                debug!(err = %e, "dropping key for closed session");
            }
            return;
        }
        Key::Enter => "\n",
        Key::Tab => "\t",
        Key::Backspace => "\x7f",
        Key::Escape => "\x1b",
        Key::ArrowUp => "\x1b[A",
        Key::ArrowDown => "\x1b[B",
        Key::ArrowRight => "\x1b[C",
        Key::ArrowLeft => "\x1b[D",
        Key::Home => "\x1b[H",
        Key::End => "\x1b[F",
        Key::Del => "\x1b[3~",
        Key::PageUp => "\x1b[5~",
        Key::PageDown => "\x1b[6~",
        _ => return,
    };
    if let Err(e) = session.send_input(bytes).await {
        debug!(err = %e, "dropping key for closed session");
    }
}

/// Copy a child stream to the operator's screen and the transcript
fn mirror_stream(
    stream: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    session: Arc<ProcessSession>,
    mirror: bool,
    is_stderr: bool,
) -> Option<tokio::task::JoinHandle<()>> {
    let mut stream = stream?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if mirror {
                        if is_stderr {
                            let _ = tokio::io::stderr().write_all(&chunk[..n]).await;
                            let _ = tokio::io::stderr().flush().await;
                        } else {
                            let _ = tokio::io::stdout().write_all(&chunk[..n]).await;
                            let _ = tokio::io::stdout().flush().await;
                        }
                    }
                    session.transcript().append(&chunk[..n]);
                }
            }
        }
    }))
}
