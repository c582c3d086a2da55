//! Request Dispatch
//!
//! Validates one incoming call against the active allow-list and routes
//! it to the owning downstream connection. Batched calls fan out
//! concurrently and come back in request order, one result per request.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::connection::DownstreamConnection;
use crate::error::{ProxyError, ProxyResult, TargetKind};
use crate::namespace;

/// One tool invocation in a batch
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Prefixed tool name, `server_id:tool_name`
    pub name: String,
    pub arguments: Value,
}

/// Routing tables derived from the active preset
#[derive(Debug, Clone, Default)]
pub struct RoutingMaps {
    pub prompt_servers: HashMap<String, String>,
    pub resource_servers: HashMap<String, String>,
}

pub struct RequestDispatcher {
    connections: HashMap<String, Arc<DownstreamConnection>>,
    /// Prefixed names the dispatcher accepts; empty means allow all
    allowed_tools: HashSet<String>,
    /// When absent, prompt and resource owners are resolved by scanning
    /// the connections' cached listings.
    routing: Option<RoutingMaps>,
}

impl RequestDispatcher {
    pub fn new(connections: HashMap<String, Arc<DownstreamConnection>>) -> Self {
        Self {
            connections,
            allowed_tools: HashSet::new(),
            routing: None,
        }
    }

    pub fn with_allowed_tools(mut self, allowed_tools: HashSet<String>) -> Self {
        self.allowed_tools = allowed_tools;
        self
    }

    pub fn with_routing(mut self, routing: RoutingMaps) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Route one tool call. The name must carry its server prefix and,
    /// when an allow-list is active, be a member of it.
    pub async fn dispatch_tool_call(&self, name: &str, arguments: Value) -> ProxyResult<Value> {
        if !self.allowed_tools.is_empty() && !self.allowed_tools.contains(name) {
            return Err(self.classify_rejected_tool(name));
        }

        let parsed = namespace::parse_prefixed_tool_name(name)?;
        let connection = self
            .connections
            .get(&parsed.server_id)
            .ok_or_else(|| ProxyError::unknown(TargetKind::Server, parsed.server_id.as_str()))?;

        tracing::debug!(
            server_id = %parsed.server_id,
            tool_name = %parsed.tool_name,
            "Dispatching tool call"
        );
        connection.call_tool(&parsed.tool_name, arguments).await
    }

    /// A rejected name is "not allowed" only when the tool actually
    /// exists downstream; otherwise the caller asked for something that
    /// does not exist and gets an unknown-target error.
    fn classify_rejected_tool(&self, name: &str) -> ProxyError {
        if let Ok(parsed) = namespace::parse_prefixed_tool_name(name) {
            let exists = self
                .connections
                .get(&parsed.server_id)
                .and_then(|connection| connection.cached_capabilities())
                .map_or(false, |caps| caps.tool_named(&parsed.tool_name).is_some());
            if exists {
                return ProxyError::NotAllowed(name.to_string());
            }
        }
        ProxyError::unknown(TargetKind::Tool, name)
    }

    /// Fan a batch out concurrently. Results come back in request
    /// order; one failing call does not touch its neighbors.
    pub async fn dispatch_batch(&self, requests: Vec<ToolCallRequest>) -> Vec<ProxyResult<Value>> {
        join_all(requests.into_iter().map(|request| async move {
            let ToolCallRequest { name, arguments } = request;
            self.dispatch_tool_call(&name, arguments).await
        }))
        .await
    }

    pub async fn dispatch_prompt(&self, name: &str, arguments: Value) -> ProxyResult<Value> {
        let server_id = self
            .resolve_prompt_owner(name)
            .ok_or_else(|| ProxyError::unknown(TargetKind::Prompt, name))?;
        let connection = self
            .connections
            .get(&server_id)
            .ok_or_else(|| ProxyError::unknown(TargetKind::Server, server_id.as_str()))?;

        tracing::debug!(server_id = %server_id, prompt = %name, "Dispatching prompt request");
        connection.get_prompt(name, arguments).await
    }

    pub async fn dispatch_resource(&self, uri: &str) -> ProxyResult<Value> {
        let server_id = self
            .resolve_resource_owner(uri)
            .ok_or_else(|| ProxyError::unknown(TargetKind::Resource, uri))?;
        let connection = self
            .connections
            .get(&server_id)
            .ok_or_else(|| ProxyError::unknown(TargetKind::Server, server_id.as_str()))?;

        tracing::debug!(server_id = %server_id, uri = %uri, "Dispatching resource read");
        connection.read_resource(uri).await
    }

    fn resolve_prompt_owner(&self, name: &str) -> Option<String> {
        if let Some(routing) = &self.routing {
            return routing.prompt_servers.get(name).cloned();
        }
        self.scan_connections(|caps| caps.prompt_named(name).is_some())
    }

    fn resolve_resource_owner(&self, uri: &str) -> Option<String> {
        if let Some(routing) = &self.routing {
            return routing.resource_servers.get(uri).cloned();
        }
        self.scan_connections(|caps| caps.resource_for_key(uri).is_some())
    }

    /// First server, in id order, whose cached listing matches.
    fn scan_connections(
        &self,
        matches: impl Fn(&muxmcp_shared::ServerCapabilities) -> bool,
    ) -> Option<String> {
        let mut entries: Vec<(&String, &Arc<DownstreamConnection>)> =
            self.connections.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (server_id, connection) in entries {
            if let Some(caps) = connection.cached_capabilities() {
                if matches(&caps) {
                    return Some(server_id.clone());
                }
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
