//! The runtime container child process, with its stdio bridged to a
//! [`BridgeHandle`].
//!
//! Frames are newline-delimited JSON in both directions: the bridge's
//! transport channel is drained into the child's stdin, and every line the
//! child prints on stdout is fed to [`BridgeHandle::listen_message`].

use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use thinbridge_core::BridgeHandle;
use thinbridge_core::config::ContainerConfig;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Container {
    child: Child,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Container {
    pub fn spawn(
        config: &ContainerConfig,
        mut frames: mpsc::UnboundedReceiver<String>,
        handle: BridgeHandle,
    ) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn container command `{}`", config.command))?;

        let mut stdin = child.stdin.take().context("container stdin was not captured")?;
        let stdout = child.stdout.take().context("container stdout was not captured")?;
        tracing::info!(command = %config.command, pid = ?child.id(), "Container started");

        let writer = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if let Err(e) = write_frame(&mut stdin, &frame).await {
                    // Dropping `frames` makes further transport writes fail
                    tracing::warn!(error = %e, "Failed to write to container stdin");
                    break;
                }
            }
            tracing::debug!("Container writer stopped");
        });

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            handle.listen_message(&line).await;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read container stdout");
                        break;
                    }
                }
            }
            tracing::info!("Container stdout closed");
        });

        Ok(Self {
            child,
            writer,
            reader,
        })
    }

    /// Wait for the child to exit and for its remaining output to be routed.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .wait()
            .await
            .context("failed to wait for container")?;
        if let Err(e) = (&mut self.reader).await {
            tracing::debug!(error = %e, "Container reader task ended abnormally");
        }
        Ok(status)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

async fn write_frame<W>(out: &mut W, frame: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(frame.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use thinbridge_core::{Bridge, ChannelTransport, LifecycleSignal, TransportStatus};

    use super::*;

    fn container_config(command: &str, args: &[&str]) -> ContainerConfig {
        ContainerConfig {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn frames_round_trip_through_child_process() {
        let (transport, frames) = ChannelTransport::new();
        let handle = BridgeHandle::new(Bridge::builder().transport(Arc::new(transport)).build());

        // `cat` echoes each request frame; the echo carries the id and no
        // payload, so it resolves the request with null
        let _container = Container::spawn(&container_config("cat", &[]), frames, handle.clone()).unwrap();
        handle
            .handle_lifecycle(LifecycleSignal::Status(TransportStatus::CryptoReady))
            .await;

        let reply = handle.send_message("pri(ping)", None).await.unwrap();
        assert_eq!(reply, Value::Null);
        assert_eq!(handle.metrics().await.snapshot().resolved, 1);
    }

    #[tokio::test]
    async fn status_lines_from_child_drive_the_bridge() {
        let (transport, frames) = ChannelTransport::new();
        let handle = BridgeHandle::new(Bridge::builder().transport(Arc::new(transport)).build());
        let mut status = handle.on_status_change().await;

        let mut container = Container::spawn(
            &container_config("sh", &["-c", r#"echo '{"status":"crypto_ready"}'"#]),
            frames,
            handle.clone(),
        )
        .unwrap();

        assert!(container.wait().await.unwrap().success());
        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), TransportStatus::CryptoReady);
    }

    #[tokio::test]
    async fn missing_command_is_reported() {
        let (transport, frames) = ChannelTransport::new();
        let handle = BridgeHandle::new(Bridge::builder().transport(Arc::new(transport)).build());

        let err = Container::spawn(&container_config("thinbridge-no-such-runtime", &[]), frames, handle)
            .err()
            .unwrap();
        assert!(err.to_string().contains("thinbridge-no-such-runtime"));
    }
}
