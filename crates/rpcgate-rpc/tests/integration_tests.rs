//! Integration tests for the rpcgate-rpc JSON-RPC host.
//!
//! Each test spawns the binary, reads `RPC_PORT=` from its stdout and drives
//! the five entry points over HTTP against a loopback backend.

use async_trait::async_trait;
use rpcgate::{BackendDispatch, BackendServer, BackendServerHandle, GatewayError};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

const SECRET: &str = "correct-secret";

struct VersionBackend;

#[async_trait]
impl BackendDispatch for VersionBackend {
    async fn dispatch(&self, method: &str, _params: Value) -> rpcgate::Result<Value> {
        match method {
            "lnrpc.Lightning.GetInfo" => Ok(json!({"version": "1.0"})),
            other => Err(GatewayError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }
}

async fn start_backend() -> BackendServerHandle {
    BackendServer::start(SECRET, Arc::new(VersionBackend))
        .await
        .expect("backend should start")
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

/// Make an RPC call to the server.
async fn rpc_call(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(port, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    let client = reqwest::Client::new();
    if let Ok(response) = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        if let Ok(json) = response.json::<Value>().await {
            return json.get("status").and_then(|v| v.as_str()) == Some("ok");
        }
    }
    false
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the RPC binary and wait until `/health` is ready.
async fn start_rpc_server() -> Result<RpcServerHandle, String> {
    let binary = if let Ok(path) = std::env::var("CARGO_BIN_EXE_rpcgate-rpc") {
        PathBuf::from(path)
    } else {
        let current_exe = std::env::current_exe()
            .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
        let target_debug_dir = current_exe
            .parent()
            .and_then(|p| p.parent())
            .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

        let mut fallback = target_debug_dir.join("rpcgate-rpc");
        if cfg!(target_os = "windows") {
            fallback.set_extension("exe");
        }
        if !fallback.exists() {
            return Err(format!(
                "CARGO_BIN_EXE_rpcgate-rpc not set and fallback binary not found at {}",
                fallback.display()
            ));
        }
        fallback
    };

    let mut child = tokio::process::Command::new(&binary)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn rpcgate-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read rpcgate-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "RPC_PORT line not emitted by rpcgate-rpc".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("rpcgate-rpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_is_ready() {
    let server = start_rpc_server().await.unwrap();

    let result = rpc_call(server.port, "isReady", json!({})).await.unwrap();
    assert_eq!(result, json!(true));

    server.stop().await;
}

#[tokio::test]
async fn test_invoke_before_connect() {
    let server = start_rpc_server().await.unwrap();

    let result = rpc_call(
        server.port,
        "invokeRPC",
        json!({"methodName": "lnrpc.Lightning.GetInfo", "request": "{}"}),
    )
    .await
    .unwrap();

    assert_eq!(result["result"], "");
    assert_eq!(result["error"], "RPC connection not ready");

    server.stop().await;
}

#[tokio::test]
async fn test_connect_invoke_disconnect() {
    let backend = start_backend().await;
    let server = start_rpc_server().await.unwrap();
    let port = server.port;

    rpc_call(
        port,
        "connectServer",
        json!({
            "serverAddress": backend.addr().to_string(),
            "devMode": false,
            "pairingSecret": SECRET
        }),
    )
    .await
    .unwrap();
    assert_eq!(rpc_call(port, "isConnected", json!({})).await.unwrap(), json!(true));

    let result = rpc_call(
        port,
        "invokeRPC",
        json!({"methodName": "lnrpc.Lightning.GetInfo", "request": "{}"}),
    )
    .await
    .unwrap();
    assert_eq!(result["result"], r#"{"version":"1.0"}"#);
    assert!(result["error"].is_null());

    let result = rpc_call(
        port,
        "invokeRPC",
        json!({"method_name": "Bogus", "request": "{}"}),
    )
    .await
    .unwrap();
    assert_eq!(result["result"], "");
    assert_eq!(result["error"], "rpc with name Bogus not found");

    rpc_call(port, "disconnect", json!({})).await.unwrap();
    rpc_call(port, "disconnect", json!({})).await.unwrap();
    assert_eq!(rpc_call(port, "isConnected", json!({})).await.unwrap(), json!(false));

    server.stop().await;
}

#[tokio::test]
async fn test_connect_with_wrong_secret() {
    let backend = start_backend().await;
    let server = start_rpc_server().await.unwrap();

    let response = rpc_call_raw(
        server.port,
        "connectServer",
        json!({
            "server_address": backend.addr().to_string(),
            "pairing_secret": "wrong-secret"
        }),
    )
    .await
    .unwrap();

    assert_eq!(response["error"]["code"], -32000);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Pairing rejected"));
    assert_eq!(
        rpc_call(server.port, "isConnected", json!({})).await.unwrap(),
        json!(false)
    );

    server.stop().await;
}

#[tokio::test]
async fn test_missing_params_and_unknown_method() {
    let server = start_rpc_server().await.unwrap();

    let response = rpc_call_raw(server.port, "connectServer", json!({}))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32602);

    let response = rpc_call_raw(server.port, "reboot", json!({})).await.unwrap();
    assert_eq!(response["error"]["code"], -32601);

    server.stop().await;
}
