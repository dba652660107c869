//! Host and viewer WebSocket channels
//!
//! Parameters are validated before the upgrade so lookup and credential
//! failures come back as plain HTTP errors. After the upgrade each socket is
//! split: a writer task drains the connection's link onto the sink while the
//! read half feeds the gateway's read loop through [`WebSocketStream`].

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use gamecast_core::models::message::Frame;
use gamecast_core::session::{FrameSink, InboundStream, LinkReceiver, SessionRecord};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::http::{AppResult, AppState};

/// Query parameters of the host channel
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostQuery {
    #[serde(alias = "gameId")]
    pub session_id: Option<String>,
    pub host_id: Option<String>,
}

/// Query parameters of the viewer channel
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerQuery {
    #[serde(alias = "gameId")]
    pub session_id: Option<String>,
}

/// WebSocket read half adapted to the gateway's `InboundStream`
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl InboundStream for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<Bytes, String>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Some(Ok(Message::Binary(bytes))) => return Some(Ok(bytes)),
                Some(Ok(Message::Close(_))) => return None, // Graceful close
                Some(Err(e)) => return Some(Err(format!("WebSocket error: {e}"))),
                None => return None, // Stream ended
                Some(Ok(_)) => {
                    // Ping/pong are answered by axum
                }
            }
        }
    }
}

/// WebSocket write half adapted to the link writer's `FrameSink`
struct WebSocketSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), String> {
        self.sender
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| e.to_string())
    }
}

fn spawn_writer(
    sender: SplitSink<WebSocket, Message>,
    receiver: LinkReceiver,
    state: &AppState,
) -> JoinHandle<()> {
    let write_timeout = state.config.relay.write_timeout();
    tokio::spawn(async move {
        let mut sink = WebSocketSink { sender };
        receiver.drain(write_timeout, &mut sink).await;
        let _ = sink.sender.send(Message::Close(None)).await;
    })
}

fn upgrade(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    channel: &'static str,
) -> Result<WebSocketUpgrade, Response> {
    ws.map_err(|rejection| {
        warn!(channel, error = %rejection, "WebSocket upgrade rejected");
        rejection.into_response()
    })
}

/// Host channel: `GET /hostGame?sessionId=<id>&hostId=<host>`
pub async fn host_handler(
    State(state): State<AppState>,
    Query(query): Query<HostQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let record = state
        .gateway
        .authorize_host(query.session_id.as_deref(), query.host_id.as_deref())?;

    let ws = match upgrade(ws, "host") {
        Ok(ws) => ws,
        Err(response) => return Ok(response),
    };

    Ok(ws
        .max_message_size(state.config.relay.max_frame_bytes)
        .on_upgrade(move |socket| handle_host_socket(socket, state, record))
        .into_response())
}

async fn handle_host_socket(socket: WebSocket, state: AppState, record: Arc<SessionRecord>) {
    let host_id = record.host_id().to_string();
    let (host, receiver) = match state.gateway.attach_host(record, &host_id) {
        Ok(attached) => attached,
        Err(e) => {
            warn!(error = %e, "Host attach failed after upgrade");
            return;
        }
    };

    let (sender, receiver_half) = socket.split();
    let writer = spawn_writer(sender, receiver, &state);
    let mut stream = WebSocketStream {
        receiver: receiver_half,
    };

    let exit = host.run(&mut stream).await;
    info!(session_id = %host.session_id(), ?exit, "Host connection closed");

    // Releases the host slot, which closes the link and stops the writer
    drop(host);
    let _ = writer.await;
}

/// Viewer channel: `GET /viewGame?sessionId=<id>`
pub async fn viewer_handler(
    State(state): State<AppState>,
    Query(query): Query<ViewerQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let record = state.gateway.find_session(query.session_id.as_deref())?;

    let ws = match upgrade(ws, "viewer") {
        Ok(ws) => ws,
        Err(response) => return Ok(response),
    };

    Ok(ws
        .max_message_size(state.config.relay.max_frame_bytes)
        .on_upgrade(move |socket| handle_viewer_socket(socket, state, record))
        .into_response())
}

async fn handle_viewer_socket(socket: WebSocket, state: AppState, record: Arc<SessionRecord>) {
    let (viewer, receiver) = match state.gateway.attach_viewer(record) {
        Ok(attached) => attached,
        Err(e) => {
            warn!(error = %e, "Viewer join failed after upgrade");
            return;
        }
    };

    let (sender, receiver_half) = socket.split();
    let writer = spawn_writer(sender, receiver, &state);
    let mut stream = WebSocketStream {
        receiver: receiver_half,
    };

    let exit = viewer.run(&mut stream).await;
    info!(session_id = %viewer.session_id(), ?exit, "Viewer connection closed");

    // Leaving the viewer set drops the link, which stops the writer
    drop(viewer);
    let _ = writer.await;
}
