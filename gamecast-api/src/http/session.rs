//! Session creation and relay statistics

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use gamecast_core::metrics::{gather_metrics, MetricsSnapshot};
use gamecast_core::models::StateBlob;
use gamecast_core::service::invite_message;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{error, info, warn};
use url::Url;

use crate::http::{AppError, AppResult, AppState};

/// Body of `POST /initSharedGame`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, alias = "hostPlayerId")]
    pub host_id: Option<String>,
    #[serde(default, alias = "gameState")]
    pub initial_state: Option<Box<RawValue>>,
    /// Recipients of a share-link invite
    #[serde(default)]
    pub phone_numbers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(rename = "shareURL")]
    pub share_url: String,
}

/// Viewer link for a session: `<base>?viewer=true&gameId=<id>`
fn share_url(state: &AppState, headers: &HeaderMap, session_id: &str) -> anyhow::Result<String> {
    let base = match &state.config.server.public_base_url {
        Some(base) => base.clone(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .filter(|h| !h.is_empty())
                .map_or_else(|| format!("localhost:{}", state.config.server.http_port), str::to_string);
            format!("http://{host}")
        }
    };

    let mut url = Url::parse(&base).with_context(|| format!("Invalid share base URL: {base}"))?;
    url.query_pairs_mut()
        .append_pair("viewer", "true")
        .append_pair("gameId", session_id);
    Ok(url.into())
}

/// Create a session and return its id and share link.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<CreateSessionResponse>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::bad_request("Request body is empty or missing"));
    }

    let request: CreateSessionRequest = serde_json::from_slice(&body)?;

    let host_id = request
        .host_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Required parameter missing: hostId"))?;
    let initial_state = request
        .initial_state
        .ok_or_else(|| AppError::bad_request("Required parameter missing: initialState"))?;

    let session_id = state
        .directory
        .create(&host_id, StateBlob::new(initial_state.get().as_bytes().to_vec()))?;
    let share_url = share_url(&state, &headers, session_id.as_str())?;

    if !request.phone_numbers.is_empty() {
        let invites = state.invites.clone();
        let message = invite_message(&share_url);
        let recipients = request.phone_numbers;
        let id = session_id.clone();
        tokio::spawn(async move {
            let report = invites.send_bulk(&recipients, &message).await;
            if report.is_complete() {
                info!(session_id = %id, sent = report.sent.len(), "Invites dispatched");
            } else {
                warn!(
                    session_id = %id,
                    sent = report.sent.len(),
                    failed = report.failed.len(),
                    "Some invites could not be sent"
                );
            }
        });
    }

    Ok(Json(CreateSessionResponse {
        session_id: session_id.to_string(),
        share_url,
    }))
}

/// Relay counters
pub async fn server_stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Prometheus text exposition
pub async fn prometheus_metrics() -> AppResult<impl IntoResponse> {
    let body = gather_metrics().map_err(|e| {
        error!("Failed to gather metrics: {}", e);
        AppError::internal_server_error("Failed to gather metrics")
    })?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_legacy_field_names() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"hostPlayerId":"p1","gameState":{"round":1}}"#).unwrap();

        assert_eq!(request.host_id.as_deref(), Some("p1"));
        assert_eq!(request.initial_state.unwrap().get(), r#"{"round":1}"#);
        assert!(request.phone_numbers.is_empty());
    }

    #[test]
    fn test_null_state_counts_as_missing() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"hostId":"p1","initialState":null}"#).unwrap();
        assert!(request.initial_state.is_none());
    }
}
