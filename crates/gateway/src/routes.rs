use std::sync::Arc;

use {
    axum::{
        extract::{State, rejection::JsonRejection},
        http::{StatusCode, header},
        response::{IntoResponse, Json, Response},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::info,
    wagate_whatsapp::{DispatchOutcome, LifecycleError, OutboundMessage, Rejection},
};

use crate::state::GatewayState;

pub const BANNER: &str = "WhatsApp Gateway is running!";

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

// ── Messaging ────────────────────────────────────────────────────────────────

/// Fields are loosely typed: clients send phone numbers both as strings and
/// as JSON numbers.
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    phone: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    sender: Option<Value>,
}

fn field(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl From<SendMessageBody> for OutboundMessage {
    fn from(body: SendMessageBody) -> Self {
        Self {
            recipient: field(body.phone),
            body: field(body.message),
            claimed_sender: field(body.sender),
        }
    }
}

fn rejection_status(rejection: Rejection) -> StatusCode {
    match rejection {
        Rejection::MissingFields | Rejection::InvalidRecipient => StatusCode::BAD_REQUEST,
        Rejection::SenderMismatch => StatusCode::FORBIDDEN,
        Rejection::NotReady => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn send_message(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Response {
    // An unreadable body is reported like an empty one: missing fields.
    let msg = OutboundMessage::from(body.map(|Json(b)| b).unwrap_or_default());
    match state.dispatcher.dispatch(&msg).await {
        DispatchOutcome::Sent => reply(
            StatusCode::OK,
            json!({ "status": true, "message": "Message sent" }),
        ),
        DispatchOutcome::Rejected(rejection) => reply(
            rejection_status(rejection),
            json!({ "status": false, "message": rejection.message() }),
        ),
        DispatchOutcome::Failed { error, .. } => reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "status": false, "message": "Failed to send message", "error": error }),
        ),
    }
}

// ── Session views ────────────────────────────────────────────────────────────

pub async fn root() -> &'static str {
    BANNER
}

pub async fn status(State(state): State<Arc<GatewayState>>) -> Response {
    let session = state.lifecycle.state();
    if session.ready() {
        reply(
            StatusCode::OK,
            json!({
                "status": true,
                "ready": true,
                "phase": session.phase,
                "clientInfo": session.client_info,
            }),
        )
    } else {
        reply(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": false,
                "ready": false,
                "phase": session.phase,
                "reconnectAttempts": session.reconnect_attempts,
                "maxAttempts": session.max_reconnect_attempts,
            }),
        )
    }
}

pub async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    let session = state.lifecycle.state();
    let (code, label) = if session.ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    reply(
        code,
        json!({
            "status": label,
            "ready": session.ready(),
            "phase": session.phase,
            "uptimeSecs": state.uptime_secs(),
            "reconnectAttempts": session.reconnect_attempts,
            "version": state.version,
        }),
    )
}

/// The live pairing QR: PNG when rendered, the raw payload otherwise.
pub async fn qr(State(state): State<Arc<GatewayState>>) -> Response {
    let Some(artifact) = state.artifacts.current().await else {
        return reply(
            StatusCode::NOT_FOUND,
            json!({ "status": false, "message": "no pairing QR available" }),
        );
    };
    let headers = [(header::CACHE_CONTROL, "no-store")];
    match &artifact.png {
        Some(png) => (
            StatusCode::OK,
            headers,
            [(header::CONTENT_TYPE, "image/png")],
            png.clone(),
        )
            .into_response(),
        None => (
            StatusCode::OK,
            headers,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            artifact.payload.clone(),
        )
            .into_response(),
    }
}

// ── Admin ────────────────────────────────────────────────────────────────────

fn admin_reply(op: &str, result: Result<(), LifecycleError>) -> Response {
    match result {
        Ok(()) => {
            info!(op, "admin transition accepted");
            reply(
                StatusCode::ACCEPTED,
                json!({ "status": true, "message": format!("{op} started") }),
            )
        },
        Err(e) => {
            let code = match e {
                LifecycleError::Busy(_) | LifecycleError::AlreadyReady => StatusCode::CONFLICT,
                LifecycleError::Terminated | LifecycleError::ControllerGone => {
                    StatusCode::SERVICE_UNAVAILABLE
                },
            };
            reply(code, json!({ "status": false, "message": e.to_string() }))
        },
    }
}

pub async fn admin_reconnect(State(state): State<Arc<GatewayState>>) -> Response {
    admin_reply("reconnect", state.lifecycle.reconnect().await)
}

pub async fn admin_logout(State(state): State<Arc<GatewayState>>) -> Response {
    admin_reply("logout", state.lifecycle.logout().await)
}

// ── Metrics ──────────────────────────────────────────────────────────────────

#[cfg(feature = "prometheus")]
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => reply(
            StatusCode::NOT_FOUND,
            json!({ "status": false, "message": "metrics recorder not installed" }),
        ),
    }
}
