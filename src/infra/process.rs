//! External process execution
//!
//! Runs one build command at a time, streaming its output into a log file
//! and keeping the last lines of stderr for failure reports.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::error::{BuildError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// One command to run
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    /// Stage the command belongs to
    pub stage: Stage,
    /// Program followed by its arguments
    pub argv: &'a [String],
    /// Working directory
    pub cwd: &'a Path,
    /// Variables set on top of the inherited environment
    pub env: &'a BTreeMap<String, String>,
    /// File receiving stdout and stderr
    pub log_path: &'a Path,
}

/// Render argv for messages
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn pump<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
        }
    }
}

/// Run a command to completion
///
/// Cancellation kills the child and fails with [`BuildError::Interrupted`].
pub async fn run_logged(spec: &ProcessSpec<'_>, cancel: &CancellationToken) -> Result<(), BuildError> {
    let stage = spec.stage.to_string();
    let command = display_command(spec.argv);
    let log_error = |e: std::io::Error| BuildError::Spawn {
        stage: stage.clone(),
        command: command.clone(),
        error: format!("log file {}: {e}", spec.log_path.display()),
    };

    let Some((program, args)) = spec.argv.split_first() else {
        return Err(BuildError::Spawn {
            stage: stage.clone(),
            command: command.clone(),
            error: "empty command".to_string(),
        });
    };

    if let Some(parent) = spec.log_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(log_error)?;
    }
    let mut log = tokio::fs::File::create(spec.log_path).await.map_err(log_error)?;
    log.write_all(format!("$ {command}\n").as_bytes())
        .await
        .map_err(log_error)?;

    tracing::debug!("[{stage}] {command} (in {})", spec.cwd.display());

    let mut child = Command::new(program)
        .args(args)
        .current_dir(spec.cwd)
        .envs(spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BuildError::Spawn {
            stage: stage.clone(),
            command: command.clone(),
            error: e.to_string(),
        })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, Stream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, Stream::Stderr, tx));
    } else {
        drop(tx);
    }

    let mut tail: VecDeque<String> = VecDeque::with_capacity(defaults::STDERR_TAIL_LINES);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                tracing::warn!("[{stage}] interrupted; killed `{command}`");
                return Err(BuildError::Interrupted { stage: stage.clone() });
            }
            message = rx.recv() => {
                let Some((stream, line)) = message else { break };
                log.write_all(line.as_bytes()).await.map_err(log_error)?;
                log.write_all(b"\n").await.map_err(log_error)?;
                if stream == Stream::Stderr {
                    if tail.len() == defaults::STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        }
    }

    let status = tokio::select! {
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(BuildError::Interrupted { stage: stage.clone() });
        }
        status = child.wait() => status.map_err(|e| BuildError::Spawn {
            stage: stage.clone(),
            command: command.clone(),
            error: e.to_string(),
        })?,
    };

    log.flush().await.map_err(log_error)?;

    if status.success() {
        return Ok(());
    }

    Err(BuildError::ProcessFailed {
        stage,
        command,
        code: status
            .code()
            .map_or_else(|| "a signal".to_string(), |c| c.to_string()),
        tail: tail.into_iter().collect::<Vec<_>>().join("\n"),
    })
}
