//! Wire types and framing for the TCP transport.
//!
//! Each message is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON-RPC 2.0 payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! The first request on a connection must be `pair` carrying the secret.

use crate::config::BridgeConfig;
use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Method name of the handshake request.
pub const PAIR_METHOD: &str = "pair";

/// Error code the backend answers a failed handshake with.
pub const PAIRING_REJECTED_CODE: i32 = -32010;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl WireRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }

    /// Handshake request carrying the pairing secret.
    pub fn pair(secret: &str) -> Self {
        Self::new(PAIR_METHOD, serde_json::json!({ "secret": secret }), 0)
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    pub id: Option<Value>,
}

impl WireResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(WireError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Parse an opaque request payload into JSON params.
///
/// Only syntax is checked; an empty payload is treated as `{}`.
pub fn parse_payload(request: &str) -> Result<Value> {
    if request.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(request).map_err(|e| GatewayError::InvalidParams {
        message: format!("request payload is not valid JSON: {}", e),
    })
}

/// Read a length-prefixed frame.
///
/// Returns `None` on clean EOF (peer closed the connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > BridgeConfig::MAX_FRAME_SIZE {
        return Err(GatewayError::Transport {
            message: format!(
                "frame size {} exceeds maximum {}",
                len,
                BridgeConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > BridgeConfig::MAX_FRAME_SIZE {
        return Err(GatewayError::InvalidParams {
            message: format!(
                "payload size {} exceeds maximum {}",
                payload.len(),
                BridgeConfig::MAX_FRAME_SIZE
            ),
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
