//! Host and viewer connection lifecycle
//!
//! The gateway turns an accepted connection into a [`HostSession`] or a
//! [`ViewerSession`]. Both own a read loop over an [`InboundStream`] and undo
//! their attachment when dropped, so every exit path (client close, transport
//! error, eviction, task abort) leaves the record consistent.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::broadcast::{self, FanoutReport};
use super::directory::SessionDirectory;
use super::link::{ClientLink, LinkId, LinkReceiver};
use super::record::{HostConnectionState, SessionRecord};
use crate::error::{Error, Result};
use crate::metrics::MetricsCounter;
use crate::models::{HostFrame, SessionId, StateBlob};

/// Inbound half of a client connection
#[async_trait]
pub trait InboundStream: Send {
    /// Next inbound payload; `None` once the peer has closed.
    async fn recv(&mut self) -> Option<std::result::Result<Bytes, String>>;
}

#[async_trait]
impl InboundStream for mpsc::Receiver<std::result::Result<Bytes, String>> {
    async fn recv(&mut self) -> Option<std::result::Result<Bytes, String>> {
        mpsc::Receiver::recv(self).await
    }
}

/// Why a read loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The peer closed the connection
    ClientClosed,
    /// Reading from the transport failed
    TransportFailed(String),
    /// The relay closed the link (host superseded, session evicted, or slow consumer)
    LinkClosed,
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::InvalidInput(format!("Required parameter missing: {name}"))),
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionGateway {
    directory: Arc<SessionDirectory>,
    queue_capacity: usize,
}

impl ConnectionGateway {
    #[must_use]
    pub const fn new(directory: Arc<SessionDirectory>, queue_capacity: usize) -> Self {
        Self {
            directory,
            queue_capacity,
        }
    }

    #[must_use]
    pub const fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    fn metrics(&self) -> &Arc<MetricsCounter> {
        self.directory.metrics()
    }

    /// Check a host's credentials without touching the session.
    pub fn authorize_host(
        &self,
        session_id: Option<&str>,
        host_id: Option<&str>,
    ) -> Result<Arc<SessionRecord>> {
        let session_id = require(session_id, "sessionId")?;
        let host_id = require(host_id, "hostId")?;
        let record = self.directory.get(session_id)?;
        record.verify_host(host_id)?;
        Ok(record)
    }

    /// Make a new connection the session's host.
    pub fn attach_host(
        &self,
        record: Arc<SessionRecord>,
        host_id: &str,
    ) -> Result<(HostSession, LinkReceiver)> {
        let (link, receiver) = ClientLink::channel(self.queue_capacity);
        let link_id = link.id();
        let closed = link.close_signal();

        let previous = record.attach_host(host_id, link)?;
        self.metrics().host_connected();

        match previous {
            HostConnectionState::NeverConnected => {
                info!(session_id = %record.id(), link_id, "Host connected");
            }
            _ => info!(session_id = %record.id(), link_id, ?previous, "Host reconnected"),
        }

        Ok((
            HostSession {
                record,
                link_id,
                closed,
            },
            receiver,
        ))
    }

    pub fn host_connect(
        &self,
        session_id: Option<&str>,
        host_id: Option<&str>,
    ) -> Result<(HostSession, LinkReceiver)> {
        let record = self.authorize_host(session_id, host_id)?;
        let host_id = record.host_id().to_string();
        self.attach_host(record, &host_id)
    }

    /// Look up the session a viewer asked for.
    pub fn find_session(&self, session_id: Option<&str>) -> Result<Arc<SessionRecord>> {
        let session_id = require(session_id, "sessionId")?;
        self.directory.get(session_id)
    }

    /// Join a new viewer connection to a session.
    ///
    /// The current state is already queued on the returned receiver.
    pub fn attach_viewer(&self, record: Arc<SessionRecord>) -> Result<(ViewerSession, LinkReceiver)> {
        let (link, receiver) = ClientLink::channel(self.queue_capacity);
        let link_id = link.id();
        let closed = link.close_signal();

        let viewers = record.add_viewer(link)?;
        self.metrics().viewer_joined();
        info!(session_id = %record.id(), link_id, viewers, "Viewer joined");

        Ok((
            ViewerSession {
                record,
                link_id,
                closed,
                metrics: Arc::clone(self.metrics()),
            },
            receiver,
        ))
    }

    pub fn viewer_join(&self, session_id: Option<&str>) -> Result<(ViewerSession, LinkReceiver)> {
        let record = self.find_session(session_id)?;
        self.attach_viewer(record)
    }
}

/// An attached host connection
///
/// Dropping it releases the host slot if this connection still holds it.
#[derive(Debug)]
pub struct HostSession {
    record: Arc<SessionRecord>,
    link_id: LinkId,
    closed: CancellationToken,
}

impl HostSession {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.record.id()
    }

    #[must_use]
    pub const fn link_id(&self) -> LinkId {
        self.link_id
    }

    #[must_use]
    pub const fn record(&self) -> &Arc<SessionRecord> {
        &self.record
    }

    /// Replace the session state and fan it out.
    ///
    /// Returns `Ok(None)` if this connection is no longer the host.
    pub fn publish(&self, blob: StateBlob) -> Result<Option<FanoutReport>> {
        broadcast::publish_from(&self.record, self.link_id, blob)
    }

    /// Read host frames until the connection ends.
    pub async fn run<S: InboundStream + ?Sized>(&self, stream: &mut S) -> LoopExit {
        loop {
            let next = tokio::select! {
                biased;
                () = self.closed.cancelled() => return LoopExit::LinkClosed,
                next = stream.recv() => next,
            };

            let payload = match next {
                None => return LoopExit::ClientClosed,
                Some(Err(e)) => return LoopExit::TransportFailed(e),
                Some(Ok(payload)) => payload,
            };

            let blob = match HostFrame::decode(&payload) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(session_id = %self.session_id(), error = %e, "Skipping malformed host frame");
                    continue;
                }
            };

            match self.publish(blob) {
                Ok(Some(report)) => trace!(
                    session_id = %self.session_id(),
                    delivered = report.delivered,
                    pruned = report.pruned,
                    "State update relayed"
                ),
                Ok(None) | Err(Error::NotFound(_)) => return LoopExit::LinkClosed,
                Err(e) => {
                    warn!(session_id = %self.session_id(), error = %e, "Skipping undeliverable host frame");
                }
            }
        }
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        if self.record.detach_host(self.link_id) {
            info!(session_id = %self.record.id(), link_id = self.link_id, "Host disconnected");
        }
    }
}

/// A joined viewer connection
///
/// Dropping it removes the viewer from the session.
#[derive(Debug)]
pub struct ViewerSession {
    record: Arc<SessionRecord>,
    link_id: LinkId,
    closed: CancellationToken,
    metrics: Arc<MetricsCounter>,
}

impl ViewerSession {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.record.id()
    }

    #[must_use]
    pub const fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Wait for the connection to end. Inbound payloads are discarded.
    pub async fn run<S: InboundStream + ?Sized>(&self, stream: &mut S) -> LoopExit {
        loop {
            let next = tokio::select! {
                biased;
                () = self.closed.cancelled() => return LoopExit::LinkClosed,
                next = stream.recv() => next,
            };

            match next {
                None => return LoopExit::ClientClosed,
                Some(Err(e)) => return LoopExit::TransportFailed(e),
                Some(Ok(payload)) => {
                    trace!(session_id = %self.session_id(), bytes = payload.len(), "Ignoring viewer payload");
                }
            }
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.record.remove_viewer(self.link_id);
        self.metrics.viewer_left();
        debug!(session_id = %self.record.id(), link_id = self.link_id, "Viewer left");
    }
}
