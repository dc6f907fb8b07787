//! RPC boundary for the external tracker
//!
//! Three methods pass straight through to the shared [`CorrectionSession`]:
//!
//! | Method       | Params         | Returns        |
//! |--------------|----------------|----------------|
//! | `isReady`    | none           | bool           |
//! | `getRequest` | none           | `TrackRequest` |
//! | `onReceive`  | `UpdateResult` | null           |
//!
//! [`RpcBoundary::dispatch`] speaks JSON-RPC 2.0, one request per line. Method
//! names match case-insensitively. `onReceive` takes its payload as the named
//! param `updateResult`, as a one-element array, or as the bare object.

use crate::playback::PlaybackHandle;
use crate::session::CorrectionSession;
use crate::types::{Result, SessionError, TrackRequest, UpdateResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Session shared between the RPC endpoint and the reviewer side
pub type SharedSession<H> = Arc<Mutex<CorrectionSession<H>>>;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const PROTOCOL_VIOLATION: i64 = -32000;
pub const SESSION_ERROR: i64 = -32001;

/// Error object of a JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<SessionError> for RpcError {
    fn from(e: SessionError) -> Self {
        let code = match e {
            SessionError::ProtocolViolation { .. } => PROTOCOL_VIOLATION,
            SessionError::MalformedRequestPayload(_) => INVALID_PARAMS,
            _ => SESSION_ERROR,
        };
        RpcError::new(code, e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    fn reply(id: Value, outcome: std::result::Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            result,
            error,
            id,
        }
    }
}

pub struct RpcBoundary<H> {
    session: SharedSession<H>,
}

impl<H> Clone for RpcBoundary<H> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<H: PlaybackHandle> RpcBoundary<H> {
    pub fn new(session: SharedSession<H>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SharedSession<H> {
        &self.session
    }

    /// Non-blocking readiness poll
    pub fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    /// Retrieve the ready request; fails outside `Ready`
    pub fn get_request(&self) -> Result<TrackRequest> {
        self.lock().take_request()
    }

    pub fn on_receive(&self, result: UpdateResult) -> Result<()> {
        self.lock().apply_result(result)
    }

    /// Decode and install a reply; a malformed payload leaves the session as is
    pub fn on_receive_value(&self, payload: Value) -> Result<()> {
        let result = UpdateResult::from_value(payload)?;
        self.on_receive(result)
    }

    /// Handle one JSON-RPC request line
    ///
    /// Returns the encoded response, or `None` for a notification (no `id`).
    /// A `getRequest` notification is not executed: its request would have no
    /// reply to travel in.
    pub fn dispatch(&self, line: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Unparseable RPC request: {}", e);
                let response = RpcResponse::reply(
                    Value::Null,
                    Err(RpcError::new(PARSE_ERROR, format!("Parse error: {}", e))),
                );
                return encode(&response);
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Invalid RPC request: {}", e);
                let response = RpcResponse::reply(
                    id,
                    Err(RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e))),
                );
                return encode(&response);
            }
        };

        if request.id.is_none() && is_get_request(&request.method) {
            log::warn!("Ignoring {} sent as a notification", request.method);
            return None;
        }

        let outcome = match request.jsonrpc.as_deref() {
            Some("2.0") | None => self.call(&request.method, request.params),
            Some(other) => Err(RpcError::new(
                INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {}", other),
            )),
        };
        if let Err(e) = &outcome {
            log::warn!("RPC {} failed: {}", request.method, e.message);
        }

        let id = request.id?;
        encode(&RpcResponse::reply(id, outcome))
    }

    fn call(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        log::debug!("RPC call: {}", method);
        match method.to_ascii_lowercase().as_str() {
            "isready" | "is_ready" => Ok(Value::Bool(self.is_ready())),
            "getrequest" | "get_request" => {
                let request = self.get_request()?;
                serde_json::to_value(request)
                    .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
            }
            "onreceive" | "on_receive" => {
                self.on_receive_value(update_payload(params)?)?;
                Ok(Value::Null)
            }
            _ => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CorrectionSession<H>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_get_request(method: &str) -> bool {
    matches!(
        method.to_ascii_lowercase().as_str(),
        "getrequest" | "get_request"
    )
}

/// Pull the `UpdateResult` out of `onReceive` params
fn update_payload(params: Value) -> Result<Value> {
    match params {
        Value::Object(mut map) => {
            for key in ["updateResult", "update_result"] {
                if let Some(payload) = map.remove(key) {
                    return Ok(payload);
                }
            }
            Ok(Value::Object(map))
        }
        Value::Array(mut items) if items.len() == 1 => Ok(items.remove(0)),
        other => Err(SessionError::MalformedRequestPayload(format!(
            "expected an UpdateResult, got {}",
            other
        ))),
    }
}

fn encode(response: &RpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(text) => Some(text),
        Err(e) => {
            log::error!("Failed to encode RPC response: {}", e);
            None
        }
    }
}
