//! Live process sessions - transcript and interaction surface

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Interaction attempted against a terminated session
    #[error("session closed: the process has exited")]
    Closed,

    #[error("invalid wait pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to write to the process: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only record of everything the supervised process printed
///
/// The mirror task is the only writer; waiters scan and then block on the
/// notifier, re-registering before the re-scan so an append between scan
/// and block is never missed.
#[derive(Debug, Default)]
pub struct Transcript {
    buf: Mutex<Vec<u8>>,
    notify: Notify,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Ok(mut buf) = self.buf.lock() {
            buf.extend_from_slice(bytes);
        }
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.buf.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full transcript as (lossy) text
    pub fn text(&self) -> String {
        self.buf
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    /// Search `pattern` from byte offset `from`; returns the end offset of
    /// the first match
    fn find(&self, pattern: &regex::bytes::Regex, from: usize) -> Option<usize> {
        let buf = self.buf.lock().ok()?;
        if from >= buf.len() {
            return None;
        }
        pattern.find(&buf[from..]).map(|m| from + m.end())
    }

    /// Wake everyone blocked on this transcript (used when the session ends)
    fn interrupt_waiters(&self) {
        self.notify.notify_waiters();
    }
}

/// Exclusive owner of one spawned process's interaction surface
///
/// Created by the supervisor when the process starts; terminated when the
/// process exits. All interactions after termination fail with
/// [`SessionError::Closed`].
pub struct ProcessSession {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    transcript: Transcript,
    closed: AtomicBool,
    read_pos: AtomicUsize,
    pid: Option<u32>,
}

impl ProcessSession {
    pub fn new(stdin: Option<ChildStdin>, pid: Option<u32>) -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(stdin),
            transcript: Transcript::new(),
            closed: AtomicBool::new(false),
            read_pos: AtomicUsize::new(0),
            pid,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the session terminated and wake any blocked waiters
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.transcript.interrupt_waiters();
        debug!("session closed");
    }

    /// Write `text` to the process's stdin, exactly as given
    ///
    /// No newline is appended; the caller decides what a complete input is.
    pub async fn send_input(&self, text: &str) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(SessionError::Closed)?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Block until `pattern` appears in the transcript past the current
    /// read position, or `timeout` elapses
    ///
    /// A timeout is an expected outcome, reported as `Ok(false)` - never an
    /// error. If the process exits while waiting, the final transcript tail
    /// is still checked before returning false.
    pub async fn wait_for_output(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<bool, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let regex =
            regex::bytes::Regex::new(pattern).map_err(|source| SessionError::BadPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        let deadline = tokio::time::Instant::now() + timeout;
        let from = self.read_pos.load(Ordering::SeqCst);

        loop {
            let notified = self.transcript.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(end) = self.transcript.find(&regex, from) {
                self.read_pos.store(end, Ordering::SeqCst);
                return Ok(true);
            }

            if self.is_closed() {
                return Ok(false);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(false);
            }
        }
    }
}
