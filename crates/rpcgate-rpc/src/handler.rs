//! JSON-RPC request handlers.
//!
//! One JSON-RPC method per gateway entry point. Parameters accept both
//! snake_case and camelCase names.

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use rpcgate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
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
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Outcome of `invokeRPC`, mirroring the host callback's two arguments.
#[derive(Debug, Serialize)]
struct InvokeOutcome {
    result: String,
    error: Option<String>,
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}", method);

    match dispatch_method(&state, method, &params).await {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

/// Extract an optional string parameter, supporting both snake_case and camelCase.
fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
fn require_str_param(params: &Value, snake: &str, camel: &str) -> Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| GatewayError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_bool())
}

/// The opaque request payload. Clients may send it pre-serialized or as JSON.
fn request_payload(params: &Value) -> String {
    match params.get("request") {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

async fn dispatch_method(state: &AppState, method: &str, params: &Value) -> Result<Value> {
    let gateway = &state.gateway;

    match method {
        "isReady" | "is_ready" => Ok(json!(gateway.is_ready())),

        "connectServer" | "connect_server" => {
            let server_address = require_str_param(params, "server_address", "serverAddress")?;
            let pairing_secret = require_str_param(params, "pairing_secret", "pairingSecret")?;
            let dev_mode = get_bool_param(params, "dev_mode", "devMode").unwrap_or(false);

            gateway
                .connect_server(&server_address, dev_mode, &pairing_secret)
                .await?;
            Ok(Value::Null)
        }

        "isConnected" | "is_connected" => Ok(json!(gateway.is_connected())),

        "disconnect" => {
            gateway.disconnect().await;
            Ok(Value::Null)
        }

        "invokeRPC" | "invoke_rpc" => {
            let method_name = require_str_param(params, "method_name", "methodName")?;
            let request = request_payload(params);

            let (tx, rx) = oneshot::channel();
            gateway.invoke_rpc(&method_name, request, move |result, error| {
                let _ = tx.send(InvokeOutcome { result, error });
            });
            let outcome = rx.await.map_err(|_| GatewayError::InternalFault {
                message: "callback dropped".to_string(),
            })?;

            Ok(serde_json::to_value(outcome)?)
        }

        _ => Err(GatewayError::MethodNotFound {
            method: method.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_accept_both_cases() {
        let snake = json!({"server_address": "relay.example:443"});
        let camel = json!({"serverAddress": "relay.example:443"});
        assert_eq!(
            get_str_param(&snake, "server_address", "serverAddress"),
            Some("relay.example:443")
        );
        assert_eq!(
            get_str_param(&camel, "server_address", "serverAddress"),
            Some("relay.example:443")
        );
        assert!(require_str_param(&json!({}), "server_address", "serverAddress").is_err());
        assert_eq!(get_bool_param(&json!({"devMode": true}), "dev_mode", "devMode"), Some(true));
    }

    #[test]
    fn test_request_payload_forms() {
        assert_eq!(request_payload(&json!({})), "{}");
        assert_eq!(request_payload(&json!({"request": "{\"a\":1}"})), "{\"a\":1}");
        assert_eq!(request_payload(&json!({"request": {"a": 1}})), "{\"a\":1}");
    }

    #[test]
    fn test_invoke_outcome_shape() {
        let value = serde_json::to_value(InvokeOutcome {
            result: String::new(),
            error: Some("RPC connection not ready".to_string()),
        })
        .unwrap();
        assert_eq!(value, json!({"result": "", "error": "RPC connection not ready"}));
    }

    #[test]
    fn test_error_response_omits_result() {
        let response = JsonRpcResponse::error(Some(json!(1)), -32601, "nope".to_string());
        let value = serde_json::to_value(response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
    }
}
