//! Stdout scanning for "server is listening" markers.

use regex::RegexSet;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tracing::debug;

use crate::{AppError, Result};

/// Matches dev-server output lines against the configured ready markers.
#[derive(Debug, Clone)]
pub struct ReadinessMatcher {
    patterns: RegexSet,
}

impl ReadinessMatcher {
    /// Compile the marker patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern is not a valid regex.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSet::new(patterns)
            .map_err(|err| AppError::Config(format!("invalid ready pattern: {err}")))?;
        Ok(Self { patterns })
    }

    /// Whether `line` announces readiness. ANSI colour codes are ignored.
    #[must_use]
    pub fn is_ready(&self, line: &str) -> bool {
        self.patterns.is_match(&strip_ansi(line))
    }
}

fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // CSI sequence: ESC [ params final-byte
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Read `stream` line by line, firing `ready` on the first marker.
///
/// Keeps draining after the marker so the child never blocks on a full
/// pipe. Dropping `ready` unsent (stream closed first) tells the waiter
/// that no marker will come.
pub async fn watch_output<R>(
    stream: R,
    matcher: ReadinessMatcher,
    mut ready: Option<oneshot::Sender<()>>,
    session_id: i64,
    label: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(session_id, stream = label, %line, "dev server output");
                if ready.is_some() && matcher.is_ready(&line) {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(session_id, stream = label, %err, "dev server output closed");
                break;
            }
        }
    }
}
