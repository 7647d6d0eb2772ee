//! Local process execution backend

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::stream::Stream;
use futures_lite::io::{AsyncBufReadExt, BufReader, Lines};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{ProcessEvent, ProcessEventType};
use crate::launcher::Launcher;
use crate::process::{ExitStatus, ProcessHandle};

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A handle to control a local process
pub struct LocalProcessHandle {
    child: Child,
    kill_on_drop: bool,
}

/// Stream of stdout/stderr lines from a local process
pub struct ProcessEventStream {
    stdout: Option<Lines<BufReader<async_process::ChildStdout>>>,
    stderr: Option<Lines<BufReader<async_process::ChildStderr>>>,
}

#[async_trait]
impl Launcher for LocalLauncher {
    type EventStream = ProcessEventStream;
    type Handle = LocalProcessHandle;

    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)> {
        let mut async_cmd = command.prepare();
        async_cmd.stdin(Stdio::null());
        async_cmd.stdout(Stdio::piped());
        async_cmd.stderr(Stdio::piped());

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::from_spawn(&command.get_program().to_string_lossy(), e))?;

        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let events = ProcessEventStream { stdout, stderr };

        let handle = LocalProcessHandle {
            child,
            kill_on_drop: true,
        };

        Ok((events, handle))
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .status()
            .await
            .map_err(|e| Error::spawn_failed(format!("failed to wait for process: {}", e)))?;
        // Reaped: nothing left to kill on drop.
        self.kill_on_drop = false;
        Ok(status.into())
    }
}

impl Drop for LocalProcessHandle {
    fn drop(&mut self) {
        if self.kill_on_drop {
            let _ = self.child.kill();
        }
    }
}

impl Stream for ProcessEventStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(stdout) = &mut self.stdout {
            match Pin::new(stdout).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    return Poll::Ready(Some(ProcessEvent::new(ProcessEventType::Stdout, line)));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                    self.stdout = None;
                }
                Poll::Pending => {}
            }
        }

        if let Some(stderr) = &mut self.stderr {
            match Pin::new(stderr).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    return Poll::Ready(Some(ProcessEvent::new(ProcessEventType::Stderr, line)));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                    self.stderr = None;
                }
                Poll::Pending => {}
            }
        }

        if self.stdout.is_none() && self.stderr.is_none() {
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}
