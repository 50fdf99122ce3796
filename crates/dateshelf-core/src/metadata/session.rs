//! The persistent `exiftool -stay_open True -@ -` worker.
//!
//! Requests are argument lines written to the worker's stdin, one argument per
//! line, terminated by `-execute`. The worker's stdout carries no framing of
//! its own, so every request also asks for a unique token to be echoed after
//! the JSON output; everything read before that token belongs to the request.
//! A single mutex covers the whole write-then-read exchange.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::{parse_output, ExifToolConfig, MetadataRecord, EXIFTOOL_FLAGS};

const STAY_OPEN_ARGS: [&str; 4] = ["-stay_open", "True", "-@", "-"];

/// How long a worker gets to exit on its own before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub(crate) struct Session {
    worker: Mutex<Worker>,
    timeout: Duration,
}

struct Worker {
    child: Child,
    stdin: Option<ChildStdin>,
    /// Lines of stdout, forwarded by a reader thread so reads can time out.
    lines: Receiver<String>,
    counter: u64,
    alive: bool,
}

impl Worker {
    /// Kill the process; all later requests go to the fallback.
    fn abandon(&mut self) {
        self.alive = false;
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Session {
    /// Start the worker. `None` when the process cannot be spawned.
    pub(crate) fn spawn(config: &ExifToolConfig, timeout: Duration) -> Option<Self> {
        let mut child = match Command::new(&config.program)
            .args(&config.prefix_args)
            .args(STAY_OPEN_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    program = %config.program.display(),
                    error = %e,
                    "cannot start persistent exiftool; using one-shot invocations"
                );
                return None;
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        };

        let (tx, rx) = mpsc::channel();
        let reader = thread::Builder::new()
            .name("exiftool-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            tracing::warn!(error = %e, "cannot start exiftool reader thread");
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }

        tracing::debug!(pid = child.id(), "started persistent exiftool");
        Some(Self {
            worker: Mutex::new(Worker {
                child,
                stdin: Some(stdin),
                lines: rx,
                counter: 0,
                alive: true,
            }),
            timeout,
        })
    }

    /// Run one request. `path` must already be absolute.
    ///
    /// Returns `None` without blocking when the worker is gone, and `None`
    /// for any failure of this exchange: broken pipe, timeout, closed stdout,
    /// empty or unparsable output.
    pub(crate) fn fetch(&self, path: &Path) -> Option<MetadataRecord> {
        // Arguments are newline-delimited, so such paths cannot be framed.
        let path = path.to_str().filter(|p| !p.contains(['\n', '\r']))?;

        let mut worker = self.worker.lock().ok()?;
        if !worker.alive {
            return None;
        }

        worker.counter += 1;
        let token = completion_token(worker.counter);
        let frame = build_frame(path, &token);
        tracing::trace!(%token, %path, "exiftool request");

        let written = match worker.stdin.as_mut() {
            Some(stdin) => stdin
                .write_all(frame.as_bytes())
                .and_then(|()| stdin.flush()),
            None => return None,
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "exiftool worker stdin closed; using one-shot invocations");
            worker.abandon();
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        let mut chunks: Vec<String> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.lines.recv_timeout(remaining) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == token {
                        break;
                    }
                    // Trailing `{ready}` of the previous `-execute`.
                    if trimmed.starts_with("{ready") && trimmed.ends_with('}') {
                        continue;
                    }
                    chunks.push(line);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        timeout = ?self.timeout,
                        %path,
                        "exiftool worker did not answer in time; using one-shot invocations"
                    );
                    worker.abandon();
                    return None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("exiftool worker exited; using one-shot invocations");
                    worker.abandon();
                    return None;
                }
            }
        }
        drop(worker);

        let record = parse_output(&chunks.join("\n"));
        if record.is_none() {
            tracing::debug!(%path, lines = chunks.len(), "no usable exiftool output");
        }
        record
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Ok(worker) = self.worker.get_mut() else {
            return;
        };
        if !worker.alive {
            return;
        }
        if let Some(mut stdin) = worker.stdin.take() {
            let _ = stdin.write_all(b"-stay_open\nFalse\n");
            let _ = stdin.flush();
        }
        let started = Instant::now();
        loop {
            match worker.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if started.elapsed() < SHUTDOWN_GRACE => {
                    thread::sleep(Duration::from_millis(20));
                }
                _ => {
                    worker.abandon();
                    return;
                }
            }
        }
    }
}

/// Unique per process and per request; never valid JSON, so it cannot be
/// mistaken for metadata output.
fn completion_token(counter: u64) -> String {
    format!("{{done:{}:{}}}", std::process::id(), counter)
}

fn build_frame(path: &str, token: &str) -> String {
    let mut args: Vec<&str> = EXIFTOOL_FLAGS.to_vec();
    args.extend([path, "-echo3", token, "-execute"]);

    let mut frame = String::new();
    for arg in args {
        frame.push_str(arg);
        frame.push('\n');
    }
    frame
}
