//! Fanout of state updates to a session's viewers

use tracing::debug;

use super::link::{ClientLink, LinkId};
use super::record::SessionRecord;
use crate::error::{Error, Result};
use crate::metrics::{FANOUT_DELIVERED_TOTAL, FANOUT_PRUNED_TOTAL};
use crate::models::message::{Frame, ServerMessage};
use crate::models::StateBlob;

/// Outcome of one fanout pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Viewers the frame was queued to
    pub delivered: usize,
    /// Viewers removed because the frame could not be queued
    pub pruned: usize,
}

/// Queue `frame` on every viewer, then drop the ones that failed.
///
/// Failed indices are removed back to front so earlier indices stay valid.
pub(crate) fn deliver(viewers: &mut Vec<ClientLink>, frame: &Frame) -> FanoutReport {
    let mut failed = Vec::new();
    for (index, viewer) in viewers.iter().enumerate() {
        if let Err(e) = viewer.send(frame.clone()) {
            debug!(link_id = viewer.id(), error = %e, "Dropping viewer after failed write");
            failed.push(index);
        }
    }

    for &index in failed.iter().rev() {
        viewers.remove(index).close();
    }

    FanoutReport {
        delivered: viewers.len(),
        pruned: failed.len(),
    }
}

fn record_fanout(report: FanoutReport) {
    FANOUT_DELIVERED_TOTAL.inc_by(report.delivered as u64);
    FANOUT_PRUNED_TOTAL.inc_by(report.pruned as u64);
}

/// Send an already-encoded frame to every viewer of `record`.
pub fn fanout(record: &SessionRecord, frame: &Frame) -> FanoutReport {
    let report = deliver(&mut record.lock().viewers, frame);
    record_fanout(report);
    report
}

/// Replace the session state and push it to every viewer.
///
/// The frame is encoded once, before the lock is taken. Replacing the state
/// and delivering happen under one lock acquisition so a viewer joining
/// concurrently sees either the old snapshot followed by this update, or this
/// update as its snapshot.
pub fn publish(record: &SessionRecord, blob: StateBlob) -> Result<FanoutReport> {
    publish_checked(record, None, blob)?.ok_or_else(|| Error::session_not_found(record.id().as_str()))
}

/// Like [`publish`], but only while `link_id` is still the session's host.
///
/// Returns `Ok(None)` when the link has been superseded.
pub(crate) fn publish_from(
    record: &SessionRecord,
    link_id: LinkId,
    blob: StateBlob,
) -> Result<Option<FanoutReport>> {
    publish_checked(record, Some(link_id), blob)
}

fn publish_checked(
    record: &SessionRecord,
    from: Option<LinkId>,
    blob: StateBlob,
) -> Result<Option<FanoutReport>> {
    let frame = ServerMessage::game_state(&blob)?;

    let report = {
        let mut inner = record.lock();
        if inner.retired {
            return Err(Error::session_not_found(record.id().as_str()));
        }
        if from.is_some() && inner.host.link_id() != from {
            return Ok(None);
        }
        inner.state = blob;
        inner.state_frame = frame.clone();
        inner.touch();
        deliver(&mut inner.viewers, &frame)
    };

    record_fanout(report);
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionId;

    fn record() -> SessionRecord {
        let state = StateBlob::from(r#"{"round":1}"#);
        let frame = ServerMessage::game_state(&state).unwrap();
        SessionRecord::new(SessionId::new(), "host".to_string(), state, frame)
    }

    #[tokio::test]
    async fn test_fanout_prunes_exactly_the_failed_viewers() {
        let record = record();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let (link, rx) = ClientLink::channel(4);
            ids.push(link.id());
            record.add_viewer(link).unwrap();
            receivers.push(Some(rx));
        }

        // Viewers 1 and 3 go away
        receivers[1] = None;
        receivers[3] = None;

        let report = fanout(&record, &Frame::from("{}"));

        assert_eq!(report, FanoutReport { delivered: 3, pruned: 2 });
        assert_eq!(record.viewer_ids(), vec![ids[0], ids[2], ids[4]]);
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_failure() {
        let record = record();
        // Capacity 1 is consumed by the join snapshot
        let (slow, _slow_rx) = ClientLink::channel(1);
        let slow_signal = slow.close_signal();
        record.add_viewer(slow).unwrap();
        let (fast, mut fast_rx) = ClientLink::channel(4);
        record.add_viewer(fast).unwrap();

        let report = publish(&record, StateBlob::from(r#"{"round":2}"#)).unwrap();

        assert_eq!(report, FanoutReport { delivered: 1, pruned: 1 });
        assert!(slow_signal.is_cancelled());
        let _snapshot = fast_rx.recv().await;
        assert_eq!(
            fast_rx.recv().await.as_deref(),
            Some(r#"{"type":"gameState","gameState":{"round":2}}"#)
        );
    }

    #[tokio::test]
    async fn test_publish_replaces_state_for_later_joins() {
        let record = record();

        publish(&record, StateBlob::from(r#"{"round":7}"#)).unwrap();

        let (viewer, mut rx) = ClientLink::channel(4);
        record.add_viewer(viewer).unwrap();
        assert_eq!(
            rx.recv().await.as_deref(),
            Some(r#"{"type":"gameState","gameState":{"round":7}}"#)
        );
        assert_eq!(record.state().as_bytes(), br#"{"round":7}"#);
    }

    #[tokio::test]
    async fn test_publish_from_superseded_link_is_ignored() {
        let record = record();
        let (old, _old_rx) = ClientLink::channel(4);
        let old_id = old.id();
        record.attach_host("host", old).unwrap();
        let (new, _new_rx) = ClientLink::channel(4);
        record.attach_host("host", new).unwrap();

        let result = publish_from(&record, old_id, StateBlob::from(r#"{"round":9}"#)).unwrap();

        assert!(result.is_none());
        assert_eq!(record.state().as_bytes(), br#"{"round":1}"#);
    }

    #[tokio::test]
    async fn test_publish_to_retired_record_fails() {
        let record = record();
        record.retire();

        assert!(matches!(
            publish(&record, StateBlob::from("{}")),
            Err(Error::NotFound(_))
        ));
    }
}
