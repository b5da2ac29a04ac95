use crate::db::{new_id, now_ms};
use crate::error::DomainError;
use crate::outbox::EventRecord;
use serde::{Deserialize, Serialize};

/// One client frame. Everything but `type` is optional at the parse level;
/// the router enforces what each command actually needs.
#[derive(Debug, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
    pub auth: Option<AuthField>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AuthField {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct WireError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The one response/event envelope. Server-pushed events reuse it with
/// `requestId = "event:<eventId>"`.
#[derive(Debug, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub ok: bool,
    #[serde(rename = "serverTs")]
    pub server_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(rename = "eventId", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
    pub state_version: Option<i64>,
}

impl Envelope {
    pub fn success(request_type: &str, request_id: &str, data: serde_json::Value) -> Self {
        Self {
            frame_type: format!("{request_type}.result"),
            request_id: request_id.to_string(),
            ok: true,
            server_ts: now_ms(),
            data: Some(data),
            error: None,
            event_id: None,
            state_version: None,
        }
    }

    pub fn failure(request_type: &str, request_id: &str, err: &DomainError) -> Self {
        Self {
            frame_type: format!("{request_type}.result"),
            request_id: request_id.to_string(),
            ok: false,
            server_ts: now_ms(),
            data: None,
            error: Some(WireError {
                code: err.code.as_str(),
                message: err.message.clone(),
                retryable: err.retryable,
                details: err.details.clone(),
            }),
            event_id: None,
            state_version: None,
        }
    }

    pub fn event(record: &EventRecord) -> Self {
        Self {
            frame_type: record.event_type.clone(),
            request_id: format!("event:{}", record.event_id),
            ok: true,
            server_ts: now_ms(),
            data: Some(record.payload.clone()),
            error: None,
            event_id: Some(record.event_id.clone()),
            state_version: Some(record.version),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            log::error!("failed to serialize envelope: {err}");
            "{\"ok\":false}".to_string()
        })
    }
}

/// Request id stamped onto replies to frames that never parsed far enough
/// to carry one.
pub fn synthetic_request_id() -> String {
    format!("invalid:{}", new_id())
}
