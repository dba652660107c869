//! Wire messages exchanged on the host and viewer channels
//!
//! Outbound messages are JSON text frames tagged by `type`. The state blob is
//! spliced in verbatim as a raw JSON value, so the relay never re-encodes the
//! game's own schema.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::StateBlob;

/// An encoded outbound frame, shared between every recipient of a fanout.
pub type Frame = Arc<str>;

/// Server-to-client messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage<'a> {
    /// Current game state, sent to viewers on join and on every host update
    GameState {
        #[serde(rename = "gameState")]
        game_state: &'a RawValue,
    },
    /// Sent to viewers when the host connection is replaced
    HostReconnected,
    /// Sent to viewers when the host connection drops
    HostDisconnected,
    /// Sent to the host when a viewer joins
    ViewerJoined,
}

impl ServerMessage<'_> {
    pub fn encode(&self) -> Result<Frame> {
        Ok(Frame::from(serde_json::to_string(self)?))
    }

    /// Encode the `gameState` frame for a blob.
    ///
    /// Fails with a serialization error if the blob is not a JSON document.
    pub fn game_state(blob: &StateBlob) -> Result<Frame> {
        let text = std::str::from_utf8(blob.as_bytes())
            .map_err(|e| Error::Internal(format!("State blob is not UTF-8: {e}")))?;
        let raw: &RawValue = serde_json::from_str(text)?;
        ServerMessage::GameState { game_state: raw }.encode()
    }
}

/// Client-to-server frame on the host channel
#[derive(Debug, Deserialize)]
pub struct HostFrame<'a> {
    #[serde(rename = "stateBlob", alias = "gameState", borrow, default)]
    state_blob: Option<&'a RawValue>,
}

impl HostFrame<'_> {
    /// Decode a host frame and extract its state blob.
    pub fn decode(payload: &[u8]) -> Result<StateBlob> {
        let frame: HostFrame<'_> = serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidInput(format!("Malformed host frame: {e}")))?;
        let raw = frame
            .state_blob
            .ok_or_else(|| Error::InvalidInput("Host frame is missing stateBlob".to_string()))?;
        Ok(StateBlob::new(raw.get().as_bytes().to_vec()))
    }
}
