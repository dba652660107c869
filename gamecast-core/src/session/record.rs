//! Per-session state
//!
//! A [`SessionRecord`] owns everything the relay knows about one game: the
//! latest state blob, the host slot and the viewer set. All mutable fields sit
//! behind a single mutex; nothing under it ever awaits.

use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::broadcast::deliver;
use super::link::{ClientLink, LinkId};
use crate::error::{Error, Result};
use crate::models::message::{Frame, ServerMessage};
use crate::models::{SessionId, StateBlob};

/// Observable state of the host role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostConnectionState {
    NeverConnected,
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub(crate) enum HostSlot {
    NeverConnected,
    Connected(ClientLink),
    Disconnected,
}

impl HostSlot {
    pub(crate) const fn link_id(&self) -> Option<LinkId> {
        match self {
            Self::Connected(link) => Some(link.id()),
            _ => None,
        }
    }

    const fn state(&self) -> HostConnectionState {
        match self {
            Self::NeverConnected => HostConnectionState::NeverConnected,
            Self::Connected(_) => HostConnectionState::Connected,
            Self::Disconnected => HostConnectionState::Disconnected,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) state: StateBlob,
    /// `state` already encoded as a `gameState` frame
    pub(crate) state_frame: Frame,
    pub(crate) host: HostSlot,
    pub(crate) viewers: Vec<ClientLink>,
    pub(crate) last_activity: Instant,
    pub(crate) retired: bool,
}

impl SessionInner {
    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// One live session
#[derive(Debug)]
pub struct SessionRecord {
    id: SessionId,
    host_id: String,
    created_at: Instant,
    inner: Mutex<SessionInner>,
}

impl SessionRecord {
    /// `state_frame` must be the encoded `gameState` frame of `state`.
    pub(crate) fn new(id: SessionId, host_id: String, state: StateBlob, state_frame: Frame) -> Self {
        let now = Instant::now();
        Self {
            id,
            host_id,
            created_at: now,
            inner: Mutex::new(SessionInner {
                state,
                state_frame,
                host: HostSlot::NeverConnected,
                viewers: Vec::new(),
                last_activity: now,
                retired: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock()
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Latest state blob
    #[must_use]
    pub fn state(&self) -> StateBlob {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn host_state(&self) -> HostConnectionState {
        self.lock().host.state()
    }

    #[must_use]
    pub fn host_link_id(&self) -> Option<LinkId> {
        self.lock().host.link_id()
    }

    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.lock().viewers.len()
    }

    /// Viewer link ids in join order
    #[must_use]
    pub fn viewer_ids(&self) -> Vec<LinkId> {
        self.lock().viewers.iter().map(ClientLink::id).collect()
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    /// Whether the record has been removed from the directory
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.lock().retired
    }

    #[must_use]
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    #[must_use]
    pub fn is_stale(&self, now: Instant, max_idle: Duration, max_age: Duration) -> bool {
        self.idle(now) > max_idle || self.age(now) > max_age
    }

    pub fn verify_host(&self, host_id: &str) -> Result<()> {
        if self.host_id == host_id {
            Ok(())
        } else {
            Err(Error::Unauthorized("Invalid host ID".to_string()))
        }
    }

    /// Install `link` as the host connection.
    ///
    /// Closes any previous host link. Viewers get `hostReconnected` whenever a
    /// host had connected before, including from `Disconnected` with no live
    /// link. Returns the state the slot was in.
    pub(crate) fn attach_host(&self, host_id: &str, link: ClientLink) -> Result<HostConnectionState> {
        self.verify_host(host_id)?;
        let notice = ServerMessage::HostReconnected.encode()?;

        let mut inner = self.lock();
        if inner.retired {
            return Err(Error::session_not_found(self.id.as_str()));
        }

        let previous = std::mem::replace(&mut inner.host, HostSlot::Connected(link));
        let previous_state = previous.state();
        if let HostSlot::Connected(old) = previous {
            old.close();
        }
        if previous_state != HostConnectionState::NeverConnected {
            let report = deliver(&mut inner.viewers, &notice);
            debug!(
                session_id = %self.id,
                delivered = report.delivered,
                pruned = report.pruned,
                "Notified viewers of host reconnect"
            );
        }
        inner.touch();

        Ok(previous_state)
    }

    /// Clear the host slot if `link_id` still holds it.
    ///
    /// Returns false when the link was already superseded or the session was
    /// retired, in which case nothing changes.
    pub(crate) fn detach_host(&self, link_id: LinkId) -> bool {
        let notice = match ServerMessage::HostDisconnected.encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to encode host disconnect notice");
                None
            }
        };

        let mut inner = self.lock();
        if inner.host.link_id() != Some(link_id) {
            return false;
        }

        // Dropping the link closes it
        inner.host = HostSlot::Disconnected;
        if let Some(notice) = notice {
            deliver(&mut inner.viewers, &notice);
        }
        true
    }

    /// Add a viewer and queue the current state as its first frame.
    ///
    /// Returns the viewer count after the join.
    pub(crate) fn add_viewer(&self, link: ClientLink) -> Result<usize> {
        let notice = ServerMessage::ViewerJoined.encode()?;

        let mut inner = self.lock();
        if inner.retired {
            return Err(Error::session_not_found(self.id.as_str()));
        }

        link.send(inner.state_frame.clone())
            .map_err(|e| Error::Transport(format!("Failed to queue initial state: {e}")))?;
        inner.viewers.push(link);
        inner.touch();

        if let HostSlot::Connected(host) = &inner.host {
            if let Err(e) = host.send(notice) {
                debug!(session_id = %self.id, error = %e, "Failed to notify host of viewer join");
            }
        }

        Ok(inner.viewers.len())
    }

    /// Remove the viewer with `link_id`, if still present.
    pub(crate) fn remove_viewer(&self, link_id: LinkId) -> bool {
        let mut inner = self.lock();
        let Some(index) = inner.viewers.iter().position(|v| v.id() == link_id) else {
            return false;
        };
        inner.viewers.remove(index);
        inner.touch();
        true
    }

    /// Close every connection and refuse new ones.
    pub(crate) fn retire(&self) {
        let mut inner = self.lock();
        inner.retired = true;
        if matches!(inner.host, HostSlot::Connected(_)) {
            inner.host = HostSlot::Disconnected;
        }
        for viewer in inner.viewers.drain(..) {
            viewer.close();
        }
    }
}
