//! LSP proxying between the workspace side and the external server

pub mod codec;
pub mod connection;

pub use codec::{RpcError, RpcMessage, RpcNotification, RpcRequest, RpcResponse};
pub use connection::{LanguageServerProxy, ProxyOptions, ServerEvent};
