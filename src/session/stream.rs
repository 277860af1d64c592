//! Output stream readers and prompt auto-responder
//!
//! Each subject gets one reader task that pumps its stdout and stderr into a
//! bounded channel as [`LineRecord`]s. The control loop drains that channel
//! on its own schedule, so a burst of output never stalls it.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::classify::is_prompt;
use super::ProcessRole;

const READ_CHUNK: usize = 8 * 1024;

/// One line of subject output
#[derive(Debug, Clone)]
pub struct LineRecord {
    pub role: ProcessRole,
    pub text: String,
    pub at: Instant,
}

impl LineRecord {
    pub fn new(role: ProcessRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Instant::now(),
        }
    }
}

/// Splits a byte stream into lines
///
/// Bytes after the last newline are held until more data arrives, so a line
/// split across reads comes out whole.
#[derive(Debug, Default)]
struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Feed a chunk, returning every line it completed
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&line));
        }
        lines
    }

    /// Take an unterminated line if it is a prompt
    ///
    /// Prompts usually wait for input without printing a newline, and the
    /// subject will not print one until answered.
    fn take_prompt(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = decode(&self.pending);
        if is_prompt(&text) {
            self.pending.clear();
            Some(text)
        } else {
            None
        }
    }

    /// Whatever is left once the stream closes
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let text = decode(&self.pending);
            self.pending.clear();
            Some(text)
        }
    }
}

/// Lossy UTF-8 decode with line endings stripped
///
/// Invalid sequences become U+FFFD; a subject printing binary never kills
/// the reader.
fn decode(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if let std::borrow::Cow::Owned(_) = &text {
        tracing::trace!("Replaced invalid UTF-8 in subject output");
    }
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Writes the configured reply to a subject's stdin
pub struct Responder {
    stdin: Option<ChildStdin>,
    reply: Vec<u8>,
}

impl Responder {
    pub fn new(stdin: ChildStdin, reply: &str) -> Self {
        let mut reply = reply.as_bytes().to_vec();
        reply.push(b'\n');
        Self {
            stdin: Some(stdin),
            reply,
        }
    }

    /// Answer one prompt
    ///
    /// A failed write means the subject already closed its stdin or exited.
    /// That is not an error for the session; the responder just goes quiet.
    async fn answer(&mut self, role: ProcessRole) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };

        let reply = &self.reply;
        let result = async {
            stdin.write_all(reply).await?;
            stdin.flush().await
        }
        .await;

        match result {
            Ok(()) => tracing::debug!(%role, "Answered prompt"),
            Err(e) => {
                tracing::debug!(%role, "Prompt reply not delivered: {}", e);
                self.stdin = None;
            }
        }
    }
}

/// Spawn the reader task for one subject
///
/// The task ends when both pipes reach EOF or the channel receiver is
/// dropped. Aborting it drops, and so closes, both pipes.
pub fn spawn_reader(
    role: ProcessRole,
    stdout: ChildStdout,
    stderr: ChildStderr,
    responder: Option<Responder>,
    tx: mpsc::Sender<LineRecord>,
) -> JoinHandle<()> {
    tokio::spawn(pump(role, stdout, stderr, responder, tx))
}

async fn pump<O, E>(
    role: ProcessRole,
    mut stdout: O,
    mut stderr: E,
    mut responder: Option<Responder>,
    tx: mpsc::Sender<LineRecord>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_lines = LineAssembler::default();
    let mut err_lines = LineAssembler::default();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        // `read` is cancel safe, so losing the race in select! drops no bytes
        let (lines, prompt) = tokio::select! {
            n = stdout.read(&mut out_buf), if out_open => match n {
                Ok(0) | Err(_) => {
                    out_open = false;
                    (out_lines.finish().into_iter().collect(), None)
                }
                Ok(n) => (out_lines.push(&out_buf[..n]), out_lines.take_prompt()),
            },
            n = stderr.read(&mut err_buf), if err_open => match n {
                Ok(0) | Err(_) => {
                    err_open = false;
                    (err_lines.finish().into_iter().collect(), None)
                }
                Ok(n) => (err_lines.push(&err_buf[..n]), err_lines.take_prompt()),
            },
        };

        for text in lines.into_iter().chain(prompt) {
            if is_prompt(&text) {
                if let Some(responder) = responder.as_mut() {
                    responder.answer(role).await;
                }
            }

            tracing::trace!(%role, "{}", text);
            if tx.send(LineRecord::new(role, text)).await.is_err() {
                return;
            }
        }
    }

    tracing::debug!(%role, "Output streams closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_joins_split_lines() {
        let mut asm = LineAssembler::default();
        assert!(asm.push(b"hello wo").is_empty());
        assert_eq!(asm.push(b"rld\nsecond\r\nthi"), vec!["hello world", "second"]);
        assert_eq!(asm.finish(), Some("thi".to_string()));
        assert_eq!(asm.finish(), None);
    }

    #[test]
    fn test_assembler_replaces_invalid_bytes() {
        let mut asm = LineAssembler::default();
        let lines = asm.push(b"bad \xff\xfe bytes\n");
        assert_eq!(lines, vec!["bad \u{FFFD}\u{FFFD} bytes"]);
    }

    #[test]
    fn test_unterminated_prompt_is_taken() {
        let mut asm = LineAssembler::default();
        assert!(asm.push(b"Remove 2 entries? (y/n) ").is_empty());
        assert_eq!(asm.take_prompt().as_deref(), Some("Remove 2 entries? (y/n) "));
        assert_eq!(asm.finish(), None);

        asm.push(b"partial output");
        assert_eq!(asm.take_prompt(), None);
        assert_eq!(asm.finish().as_deref(), Some("partial output"));
    }

    #[tokio::test]
    async fn test_pump_preserves_order_per_stream() {
        let stdout: &[u8] = b"one\ntwo\nthree";
        let stderr: &[u8] = b"warn\n";
        let (tx, mut rx) = mpsc::channel(16);

        pump(ProcessRole::Client, stdout, stderr, None, tx).await;

        let mut out = Vec::new();
        let mut err = Vec::new();
        while let Ok(record) = rx.try_recv() {
            assert_eq!(record.role, ProcessRole::Client);
            if record.text == "warn" {
                err.push(record.text);
            } else {
                out.push(record.text);
            }
        }
        assert_eq!(out, vec!["one", "two", "three"]);
        assert_eq!(err, vec!["warn"]);
    }

    #[tokio::test]
    async fn test_pump_stops_when_receiver_dropped() {
        let stdout: &[u8] = b"a\nb\nc\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        // Must return rather than block on a closed channel
        pump(ProcessRole::Server, stdout, tokio::io::empty(), None, tx).await;
    }
}
