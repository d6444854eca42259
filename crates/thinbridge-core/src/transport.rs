use tokio::sync::mpsc;

use crate::error::BridgeError;

/// The outbound half of the channel to the runtime container.
///
/// `post` takes an already serialized frame and must not block; writers that
/// need to await I/O should hand the frame to a task (see [`ChannelTransport`]).
pub trait Transport: Send + Sync {
    fn post(&self, frame: String) -> Result<(), BridgeError>;
}

/// Transport backed by an unbounded channel. The receiving end is typically
/// drained by a task that writes frames to the container's stdin.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn post(&self, frame: String) -> Result<(), BridgeError> {
        self.tx
            .send(frame)
            .map_err(|_| BridgeError::Transport("channel closed".into()))
    }
}
