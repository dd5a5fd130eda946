//! Request expansion and workspace admission
//!
//! The expander owns the `initialize` handshake: it injects the client
//! capability payload and the per-language initialization options before the
//! request reaches the server. Subsequent requests pass through untouched,
//! subject only to the workspace admission policy that bounds how many
//! concurrent project roots the external server is asked to track.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{LaunchError, Result};
use crate::proxy::LanguageServerProxy;
use crate::types::ServerOptions;

/// Capabilities advertised to the server during `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    pub workspace: WorkspaceCapabilities,
    pub text_document: TextDocumentCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCapabilities {
    pub workspace_folders: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentCapabilities {
    pub synchronization: SynchronizationCapabilities,
    pub hover: HoverCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationCapabilities {
    pub did_save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverCapabilities {
    pub content_format: Vec<String>,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            workspace: WorkspaceCapabilities {
                workspace_folders: true,
            },
            text_document: TextDocumentCapabilities {
                synchronization: SynchronizationCapabilities { did_save: true },
                hover: HoverCapabilities {
                    content_format: vec!["markdown".to_string(), "plaintext".to_string()],
                },
            },
        }
    }
}

/// Admission policy for the expander
#[derive(Debug, Clone)]
pub struct ExpanderOptions {
    /// Concurrent workspace roots the server is asked to handle
    pub max_workspaces: usize,
    /// Server multiplexes roots natively; the cap is not enforced
    pub builtin_workspace: bool,
}

impl From<&ServerOptions> for ExpanderOptions {
    fn from(options: &ServerOptions) -> Self {
        Self {
            max_workspaces: options.max_workspaces,
            builtin_workspace: options.builtin_workspace,
        }
    }
}

/// Tracks workspace roots against the configured cap.
///
/// A root already admitted is always let through again; only genuinely new
/// roots count against the limit.
#[derive(Debug)]
pub struct WorkspaceGate {
    roots: HashSet<String>,
    max_workspaces: usize,
    builtin_workspace: bool,
}

impl WorkspaceGate {
    pub fn new(max_workspaces: usize, builtin_workspace: bool) -> Self {
        Self {
            roots: HashSet::new(),
            max_workspaces,
            builtin_workspace,
        }
    }

    /// Admit a root; `Ok(true)` when it is new, `Ok(false)` when already
    /// tracked, `CapacityExceeded` when the cap is hit.
    pub fn admit(&mut self, root: &str) -> Result<bool> {
        if self.roots.contains(root) {
            return Ok(false);
        }
        if !self.builtin_workspace && self.roots.len() >= self.max_workspaces {
            return Err(LaunchError::CapacityExceeded {
                max_workspaces: self.max_workspaces,
            });
        }
        self.roots.insert(root.to_string());
        Ok(true)
    }

    /// Stop tracking a root; returns whether it was tracked
    pub fn release(&mut self, root: &str) -> bool {
        self.roots.remove(root)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Expands and routes LSP requests through a connected proxy
#[derive(Debug)]
pub struct RequestExpander {
    proxy: Arc<LanguageServerProxy>,
    init_options: Value,
    gate: RwLock<WorkspaceGate>,
    server_capabilities: RwLock<Option<Value>>,
}

impl RequestExpander {
    /// Bind language-specific initialize options to a connected proxy
    pub fn new(
        proxy: Arc<LanguageServerProxy>,
        init_options: Value,
        options: ExpanderOptions,
    ) -> Self {
        Self {
            proxy,
            init_options,
            gate: RwLock::new(WorkspaceGate::new(
                options.max_workspaces,
                options.builtin_workspace,
            )),
            server_capabilities: RwLock::new(None),
        }
    }

    /// Run the `initialize` handshake for a workspace root.
    ///
    /// Client capabilities and the per-language initialization options are
    /// merged into the request before it is forwarded; the server's
    /// capabilities from the reply are retained for later inspection.
    pub async fn initialize(&self, root_uri: &str) -> Result<Value> {
        self.gate.write().await.admit(root_uri)?;

        let params = build_initialize_params(std::process::id(), root_uri, &self.init_options);
        let result = self.proxy.request("initialize", Some(params)).await?;

        *self.server_capabilities.write().await = result.get("capabilities").cloned();
        self.proxy.notify("initialized", Some(json!({}))).await?;

        info!(root = root_uri, "language server initialized");
        Ok(result)
    }

    /// Forward a request for a workspace root, admitting the root first
    pub async fn request(
        &self,
        root_uri: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        self.gate.write().await.admit(root_uri)?;
        self.proxy.request(method, params).await
    }

    /// Forward a notification unchanged
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.proxy.notify(method, params).await
    }

    /// Capabilities the server reported during `initialize`
    pub async fn server_capabilities(&self) -> Option<Value> {
        self.server_capabilities.read().await.clone()
    }

    /// Number of workspace roots currently tracked
    pub async fn workspace_count(&self) -> usize {
        self.gate.read().await.len()
    }

    /// Stop tracking a workspace root, freeing capacity
    pub async fn release_workspace(&self, root_uri: &str) -> bool {
        let released = self.gate.write().await.release(root_uri);
        if released {
            debug!(root = root_uri, "workspace released");
        }
        released
    }

    /// The underlying proxy connection
    pub fn proxy(&self) -> &Arc<LanguageServerProxy> {
        &self.proxy
    }

    /// Close the proxy connection
    pub async fn shutdown(&self) {
        self.proxy.disconnect().await;
    }
}

pub(crate) fn build_initialize_params(
    process_id: u32,
    root_uri: &str,
    init_options: &Value,
) -> Value {
    let mut params = json!({
        "processId": process_id,
        "rootUri": root_uri,
        "capabilities": ClientCapabilities::default(),
        "workspaceFolders": [{"uri": root_uri, "name": "workspace"}],
    });
    if !init_options.is_null() {
        params["initializationOptions"] = init_options.clone();
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_params_carry_capabilities_and_options() {
        let init_options = json!({"installGoDependency": false});
        let params = build_initialize_params(42, "file:///proj", &init_options);

        assert_eq!(params["processId"], 42);
        assert_eq!(params["rootUri"], "file:///proj");
        assert_eq!(params["capabilities"]["workspace"]["workspaceFolders"], true);
        assert_eq!(
            params["capabilities"]["textDocument"]["hover"]["contentFormat"][0],
            "markdown"
        );
        assert_eq!(params["initializationOptions"]["installGoDependency"], false);
    }

    #[test]
    fn test_initialize_params_skip_null_options() {
        let params = build_initialize_params(42, "file:///proj", &Value::Null);
        assert!(params.get("initializationOptions").is_none());
    }

    #[test]
    fn test_gate_rejects_over_capacity() {
        let mut gate = WorkspaceGate::new(1, false);
        assert!(gate.admit("file:///a").unwrap());

        let err = gate.admit("file:///b").unwrap_err();
        assert!(matches!(
            err,
            LaunchError::CapacityExceeded { max_workspaces: 1 }
        ));
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_gate_readmits_known_root() {
        let mut gate = WorkspaceGate::new(1, false);
        assert!(gate.admit("file:///a").unwrap());
        assert!(!gate.admit("file:///a").unwrap());
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_builtin_workspace_bypasses_cap() {
        let mut gate = WorkspaceGate::new(1, true);
        assert!(gate.admit("file:///a").unwrap());
        assert!(gate.admit("file:///b").unwrap());
        assert!(gate.admit("file:///c").unwrap());
        assert_eq!(gate.len(), 3);
    }

    #[test]
    fn test_release_frees_capacity() {
        let mut gate = WorkspaceGate::new(1, false);
        assert!(gate.admit("file:///a").unwrap());
        assert!(gate.release("file:///a"));
        assert!(!gate.release("file:///a"));
        assert!(gate.admit("file:///b").unwrap());
    }
}
