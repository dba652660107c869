//! Connection handles
//!
//! A [`ClientLink`] is the relay's side of one accepted socket: a bounded
//! queue of encoded frames plus a close signal. The socket's writer task owns
//! the matching [`LinkReceiver`] and drains the queue; the session record owns
//! the link itself, in either the host slot or the viewer set.
//!
//! Sends never block. A full queue means the client is too slow to keep up and
//! is reported as a failed write, the same as a closed connection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::message::Frame;

/// Outbound half of a client connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), String>;
}

/// Process-unique connection identity
pub type LinkId = u64;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Why a frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Channel full: client too slow to consume messages")]
    Full,
    #[error("Channel closed: client disconnected")]
    Closed,
}

/// Relay-side handle of one client connection
#[derive(Debug)]
pub struct ClientLink {
    id: LinkId,
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl ClientLink {
    /// Create a link and the receiver its writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, LinkReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let link = Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            sender,
            closed: closed.clone(),
        };
        (link, LinkReceiver { receiver, closed })
    }

    #[must_use]
    pub const fn id(&self) -> LinkId {
        self.id
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), LinkError> {
        if self.closed.is_cancelled() {
            return Err(LinkError::Closed);
        }
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::Full,
            mpsc::error::TrySendError::Closed(_) => LinkError::Closed,
        })
    }

    /// Signal the connection to shut down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Token that fires when this link is closed, for the connection's read loop.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Drop for ClientLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Writer-side end of a [`ClientLink`]
#[derive(Debug)]
pub struct LinkReceiver {
    receiver: mpsc::Receiver<Frame>,
    closed: CancellationToken,
}

impl LinkReceiver {
    /// Next frame to write, or `None` once the link is closed.
    ///
    /// Frames still queued when the link closes are discarded.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            frame = self.receiver.recv() => frame,
        }
    }

    /// Report a failed socket write; later sends on the link fail.
    pub fn fail(&self) {
        self.closed.cancel();
    }

    /// Pump queued frames into `sink`, bounding each write by `write_timeout`.
    ///
    /// Returns when the link closes or a write fails or times out; in the latter
    /// cases the link is marked failed so the next fanout prunes it.
    pub async fn drain<S: FrameSink + ?Sized>(mut self, write_timeout: Duration, sink: &mut S) {
        while let Some(frame) = self.recv().await {
            match tokio::time::timeout(write_timeout, sink.send_frame(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "Socket write failed");
                    self.fail();
                    break;
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?write_timeout,
                        "Socket write timed out, dropping slow connection"
                    );
                    self.fail();
                    break;
                }
            }
        }
    }
}

impl Drop for LinkReceiver {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
