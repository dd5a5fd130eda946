//! JSON-RPC 2.0 message types and LSP wire framing
//!
//! Messages travel over the socket framed with `Content-Length` headers as
//! mandated by the Language Server Protocol. Payload semantics are never
//! altered here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{LaunchError, Result};

/// Protocol version stamped on every message
pub const JSONRPC_VERSION: &str = "2.0";

/// A request expecting a correlated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A response correlated to a request by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error payload of a failed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A fire-and-forget notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any message that can appear on the wire.
///
/// Variant order matters for untagged deserialization: requests carry both
/// `id` and `method`, responses only `id`, notifications only `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
    Notification(RpcNotification),
}

impl RpcMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        RpcMessage::Request(RpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        })
    }

    pub fn response(id: u64, result: Value) -> Self {
        RpcMessage::Response(RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        RpcMessage::Notification(RpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        })
    }
}

/// Write one framed message
pub async fn write_message<W>(writer: &mut W, message: &RpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)
        .map_err(|err| LaunchError::Protocol(format!("failed to encode message: {}", err)))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message; `None` on a clean end of stream
pub async fn read_message<R>(reader: &mut R) -> Result<Option<RpcMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }

        if let Some(value) = line.strip_prefix("Content-Length:") {
            let parsed = value.trim().parse::<usize>().map_err(|err| {
                LaunchError::Protocol(format!("bad Content-Length '{}': {}", value.trim(), err))
            })?;
            content_length = Some(parsed);
        }
        // Content-Type and unknown headers are ignored
    }

    let length = content_length
        .ok_or_else(|| LaunchError::Protocol("frame without Content-Length header".to_string()))?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let message = serde_json::from_slice(&body)
        .map_err(|err| LaunchError::Protocol(format!("failed to parse message: {}", err)))?;
    Ok(Some(message))
}
