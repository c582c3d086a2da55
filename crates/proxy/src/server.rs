//! Proxy Façade
//!
//! The single entry point an inbound transport talks to. Holds the
//! active preset, the live downstream roster, and the merged filtered
//! capability view, and routes consumer calls through the dispatcher.
//!
//! The filtered view is an immutable snapshot swapped atomically on
//! every rebuild, so a call dispatched mid-rebuild sees either the old
//! view or the new one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use muxmcp_shared::{InboundDescriptor, Preset, ServerCapabilities, ServerConfig};

use crate::client::ClientFactory;
use crate::config::EngineConfig;
use crate::connection::{ConnectionStatus, DownstreamConnection};
use crate::dispatch::{RequestDispatcher, RoutingMaps, ToolCallRequest};
use crate::error::{ProxyError, ProxyResult, TargetKind};
use crate::filter::{self, FilterResult};
use crate::namespace;

/// Observer of merged capability rebuilds. Notified once per rebuild,
/// after the new view is installed.
pub trait CapabilityUpdateListener: Send + Sync {
    fn capabilities_updated(&self, all_capabilities: &HashMap<String, ServerCapabilities>);
}

/// A downstream whose capabilities could not be fetched in the last
/// full refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub server_id: String,
    pub error: String,
}

/// The merged view plus the raw per-server map it was computed from.
#[derive(Debug, Default, Serialize)]
pub struct FilteredState {
    pub all_capabilities: HashMap<String, ServerCapabilities>,
    pub filter: FilterResult,
    pub fetch_failures: Vec<FetchFailure>,
}

pub struct ProxyMcpServer {
    factory: Arc<dyn ClientFactory>,
    engine_config: EngineConfig,
    preset: RwLock<Option<Preset>>,
    connections: RwLock<HashMap<String, Arc<DownstreamConnection>>>,
    filtered: Mutex<Arc<FilteredState>>,
    status: RwLock<ConnectionStatus>,
    inbound: RwLock<Option<InboundDescriptor>>,
    listener: Option<Arc<dyn CapabilityUpdateListener>>,
}

impl ProxyMcpServer {
    pub fn new(factory: Arc<dyn ClientFactory>, engine_config: EngineConfig) -> Self {
        Self {
            factory,
            engine_config,
            preset: RwLock::new(None),
            connections: RwLock::new(HashMap::new()),
            filtered: Mutex::new(Arc::new(FilteredState::default())),
            status: RwLock::new(ConnectionStatus::Stopped),
            inbound: RwLock::new(None),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CapabilityUpdateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Record the preset and inbound endpoint and mark the proxy
    /// running. Downstreams are wired separately through
    /// [`update_downstreams`](Self::update_downstreams).
    pub fn start(&self, preset: Preset, inbound: Option<InboundDescriptor>) {
        self.set_status(ConnectionStatus::Starting);
        tracing::info!(preset = %preset.name, "Starting proxy");
        if let Ok(mut slot) = self.preset.write() {
            *slot = Some(preset);
        }
        if let Ok(mut slot) = self.inbound.write() {
            *slot = inbound;
        }
        self.set_status(ConnectionStatus::Running);
    }

    /// Disconnect every downstream and mark the proxy stopped.
    pub async fn stop(&self) {
        self.set_status(ConnectionStatus::Stopping);
        let connections: Vec<Arc<DownstreamConnection>> =
            self.connection_map().into_values().collect();
        join_all(connections.iter().map(|connection| connection.disconnect())).await;
        self.set_status(ConnectionStatus::Stopped);
        tracing::info!("Proxy stopped");
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn active_preset(&self) -> Option<Preset> {
        self.preset
            .read()
            .ok()
            .and_then(|preset| preset.clone())
    }

    pub fn inbound_endpoint(&self) -> Option<InboundDescriptor> {
        self.inbound
            .read()
            .ok()
            .and_then(|inbound| inbound.clone())
    }

    /// Live downstream server ids, sorted.
    pub fn downstream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .read()
            .map(|connections| connections.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Current filtered view, including diagnostics for preset
    /// references that matched nothing and servers that failed to
    /// answer the last refresh.
    pub fn filtered_state(&self) -> Arc<FilteredState> {
        self.current_filtered()
    }

    /// Swap the live connection roster to match `configs`. Disabled
    /// servers get no connection; connections whose config is unchanged
    /// are kept as-is; everything dropped is disconnected. Does not
    /// rebuild the capability view, that is the caller's next step.
    pub async fn update_downstreams(&self, configs: &[ServerConfig]) {
        let current = self.connection_map();

        let mut next: HashMap<String, Arc<DownstreamConnection>> = HashMap::new();
        for config in configs.iter().filter(|c| c.enabled) {
            if let Some(existing) = current.get(&config.id) {
                if existing.config() == config {
                    next.insert(config.id.clone(), existing.clone());
                    continue;
                }
            }
            match self.factory.create(config) {
                Ok(client) => {
                    let connection = Arc::new(DownstreamConnection::new(
                        config.clone(),
                        client,
                        &self.engine_config,
                    ));
                    next.insert(config.id.clone(), connection);
                }
                Err(e) => {
                    tracing::error!(
                        server_id = %config.id,
                        error = %e,
                        "Failed to build downstream client, skipping server"
                    );
                }
            }
        }

        let dropped: Vec<Arc<DownstreamConnection>> = current
            .values()
            .filter(|connection| {
                next.get(connection.server_id())
                    .map_or(true, |kept| !Arc::ptr_eq(kept, connection))
            })
            .cloned()
            .collect();

        tracing::info!(server_count = next.len(), "Downstream roster updated");
        if let Ok(mut connections) = self.connections.write() {
            *connections = next;
        }

        join_all(dropped.iter().map(|connection| connection.disconnect())).await;
    }

    /// Replace the active preset and rebuild the filtered view.
    pub async fn apply_preset(&self, preset: Preset) {
        tracing::info!(preset = %preset.name, preset_id = %preset.id, "Applying preset");
        if let Ok(mut slot) = self.preset.write() {
            *slot = Some(preset);
        }
        self.refresh_filtered_capabilities().await;
    }

    /// Fetch capabilities from every live downstream in parallel and
    /// rebuild the filtered view. A server that fails to answer is
    /// recorded as a fetch failure and simply missing from the view;
    /// the others are unaffected.
    pub async fn refresh_filtered_capabilities(&self) {
        let connections = self.connection_list();

        let fetches = connections.iter().map(|(server_id, connection)| async move {
            let result = connection.get_capabilities(false).await;
            (server_id.clone(), result)
        });
        let results = join_all(fetches).await;

        let mut all = HashMap::new();
        let mut fetch_failures = Vec::new();
        for (server_id, result) in results {
            match result {
                Ok(caps) => {
                    all.insert(server_id, caps);
                }
                Err(e) => {
                    tracing::warn!(
                        server_id = %server_id,
                        error = %e,
                        "Capability fetch failed during refresh"
                    );
                    fetch_failures.push(FetchFailure {
                        server_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let state = self.swap_filtered(all, fetch_failures);
        tracing::info!(
            tool_count = state.filter.capabilities.tools.len(),
            missing_tools = state.filter.missing_tools.len(),
            "Filtered capability view rebuilt"
        );
        self.notify(&state);
    }

    /// Force-refetch one server and patch it into the view.
    pub async fn refresh_server_capabilities(&self, server_id: &str) -> ProxyResult<()> {
        let connection = self
            .connection_map()
            .get(server_id)
            .cloned()
            .ok_or_else(|| ProxyError::unknown(TargetKind::Server, server_id))?;

        let caps = connection.get_capabilities(true).await?;
        let state = self.patch_filtered(server_id, Some(caps));
        self.notify(&state);
        Ok(())
    }

    /// Drop one server from the view without touching its connection.
    pub fn remove_server_capabilities(&self, server_id: &str) {
        let state = self.patch_filtered(server_id, None);
        tracing::info!(server_id = %server_id, "Removed server from capability view");
        self.notify(&state);
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ProxyResult<Value> {
        let state = self.current_filtered();
        self.dispatcher_for(&state)
            .dispatch_tool_call(name, arguments)
            .await
    }

    pub async fn call_tools_batch(&self, requests: Vec<ToolCallRequest>) -> Vec<ProxyResult<Value>> {
        let state = self.current_filtered();
        self.dispatcher_for(&state).dispatch_batch(requests).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> ProxyResult<Value> {
        let state = self.current_filtered();
        if state.filter.capabilities.prompt_named(name).is_none() {
            return Err(ProxyError::unknown(TargetKind::Prompt, name));
        }
        self.dispatcher_for(&state)
            .dispatch_prompt(name, arguments)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> ProxyResult<Value> {
        let state = self.current_filtered();
        if state.filter.capabilities.resource_for_key(uri).is_none() {
            return Err(ProxyError::unknown(TargetKind::Resource, uri));
        }
        self.dispatcher_for(&state).dispatch_resource(uri).await
    }

    fn dispatcher_for(&self, state: &FilteredState) -> RequestDispatcher {
        let mut dispatcher = RequestDispatcher::new(self.connection_map())
            .with_allowed_tools(state.filter.allowed_tools.clone());
        if self.has_preset() {
            dispatcher = dispatcher.with_routing(RoutingMaps {
                prompt_servers: state.filter.prompt_servers.clone(),
                resource_servers: state.filter.resource_servers.clone(),
            });
        }
        dispatcher
    }

    fn has_preset(&self) -> bool {
        self.preset
            .read()
            .map(|preset| preset.is_some())
            .unwrap_or(false)
    }

    fn set_status(&self, next: ConnectionStatus) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *status = next;
    }

    fn current_filtered(&self) -> Arc<FilteredState> {
        let guard = self
            .filtered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn connection_map(&self) -> HashMap<String, Arc<DownstreamConnection>> {
        self.connections
            .read()
            .map(|connections| connections.clone())
            .unwrap_or_default()
    }

    fn connection_list(&self) -> Vec<(String, Arc<DownstreamConnection>)> {
        let mut list: Vec<(String, Arc<DownstreamConnection>)> = self
            .connection_map()
            .into_iter()
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Rebuild the whole view from a fresh capability map.
    fn swap_filtered(
        &self,
        all: HashMap<String, ServerCapabilities>,
        fetch_failures: Vec<FetchFailure>,
    ) -> Arc<FilteredState> {
        let preset = self.active_preset();
        let filter = compute_filter(preset.as_ref(), &all);
        let next = Arc::new(FilteredState {
            all_capabilities: all,
            filter,
            fetch_failures,
        });
        let mut current = self
            .filtered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::clone(&next);
        next
    }

    /// Patch one server in or out of the view. Read, patch, recompute,
    /// and swap happen under the lock so concurrent patches serialize.
    fn patch_filtered(
        &self,
        server_id: &str,
        entry: Option<ServerCapabilities>,
    ) -> Arc<FilteredState> {
        let preset = self.active_preset();
        let mut current = self
            .filtered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut all = current.all_capabilities.clone();
        match entry {
            Some(caps) => {
                all.insert(server_id.to_string(), caps);
            }
            None => {
                all.remove(server_id);
            }
        }
        let mut fetch_failures = current.fetch_failures.clone();
        fetch_failures.retain(|failure| failure.server_id != server_id);

        let filter = compute_filter(preset.as_ref(), &all);
        let next = Arc::new(FilteredState {
            all_capabilities: all,
            filter,
            fetch_failures,
        });
        *current = Arc::clone(&next);
        next
    }

    fn notify(&self, state: &FilteredState) {
        if let Some(listener) = &self.listener {
            listener.capabilities_updated(&state.all_capabilities);
        }
    }
}

/// With a preset, the view is the preset's selection. Without one, the
/// full merged surface is exposed and every tool is callable.
fn compute_filter(
    preset: Option<&Preset>,
    all: &HashMap<String, ServerCapabilities>,
) -> FilterResult {
    match preset {
        Some(preset) => filter::apply_preset(all, preset),
        None => FilterResult {
            capabilities: namespace::prefix_all_capabilities(all),
            ..FilterResult::default()
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::DownstreamClient;
    use async_trait::async_trait;
    use muxmcp_shared::{
        PromptDescriptor, ResourceDescriptor, ToolDescriptor, ToolReference, TransportDescriptor,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct MockClient {
        id: String,
        caps: ServerCapabilities,
        fail_fetch: bool,
        tool_calls: StdMutex<Vec<String>>,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl DownstreamClient for MockClient {
        async fn connect(&self) -> ProxyResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> ProxyResult<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_capabilities(&self) -> ProxyResult<ServerCapabilities> {
            if self.fail_fetch {
                return Err(ProxyError::transport("listing failed"));
            }
            Ok(self.caps.clone())
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> ProxyResult<Value> {
            if let Ok(mut calls) = self.tool_calls.lock() {
                calls.push(name.to_string());
            }
            Ok(json!({ "server": self.id, "tool": name }))
        }

        async fn get_prompt(&self, name: &str, _arguments: Value) -> ProxyResult<Value> {
            Ok(json!({ "server": self.id, "prompt": name }))
        }

        async fn read_resource(&self, uri: &str) -> ProxyResult<Value> {
            Ok(json!({ "server": self.id, "resource": uri }))
        }
    }

    #[derive(Default)]
    struct MockFactory {
        caps_by_id: HashMap<String, ServerCapabilities>,
        fail_create: Vec<String>,
        fail_fetch: Vec<String>,
        creates: AtomicUsize,
        clients: StdMutex<HashMap<String, Arc<MockClient>>>,
    }

    impl MockFactory {
        fn client(&self, id: &str) -> Arc<MockClient> {
            self.clients.lock().unwrap().get(id).unwrap().clone()
        }
    }

    impl ClientFactory for MockFactory {
        fn create(&self, config: &ServerConfig) -> ProxyResult<Arc<dyn DownstreamClient>> {
            if self.fail_create.contains(&config.id) {
                return Err(ProxyError::configuration("unsupported transport"));
            }
            self.creates.fetch_add(1, Ordering::SeqCst);
            let client = Arc::new(MockClient {
                id: config.id.clone(),
                caps: self
                    .caps_by_id
                    .get(&config.id)
                    .cloned()
                    .unwrap_or_default(),
                fail_fetch: self.fail_fetch.contains(&config.id),
                tool_calls: StdMutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            });
            if let Ok(mut clients) = self.clients.lock() {
                clients.insert(config.id.clone(), client.clone());
            }
            Ok(client)
        }
    }

    fn sample_factory() -> Arc<MockFactory> {
        let mut caps_by_id = HashMap::new();
        caps_by_id.insert(
            "s1".to_string(),
            ServerCapabilities {
                tools: vec![ToolDescriptor::new("t1")],
                prompts: vec![PromptDescriptor::new("p1")],
                ..ServerCapabilities::default()
            },
        );
        caps_by_id.insert(
            "s2".to_string(),
            ServerCapabilities {
                tools: vec![ToolDescriptor::new("t2")],
                resources: vec![ResourceDescriptor::new("board", "jira://board")],
                ..ServerCapabilities::default()
            },
        );
        Arc::new(MockFactory {
            caps_by_id,
            ..MockFactory::default()
        })
    }

    fn server(id: &str, enabled: bool) -> ServerConfig {
        let mut config = ServerConfig::new(
            id,
            id.to_uppercase(),
            TransportDescriptor::Http {
                endpoint_url: "http://localhost:1".to_string(),
            },
        );
        config.enabled = enabled;
        config
    }

    fn configs() -> Vec<ServerConfig> {
        vec![server("s1", true), server("s2", true), server("s3", false)]
    }

    fn dev_preset() -> Preset {
        Preset::new("dev").with_tools(vec![
            ToolReference::new("s1", "t1"),
            ToolReference::new("s2", "t2"),
        ])
    }

    async fn started_proxy() -> (ProxyMcpServer, Arc<MockFactory>) {
        let factory = sample_factory();
        let proxy = ProxyMcpServer::new(factory.clone(), EngineConfig::default());
        proxy.start(dev_preset(), None);
        proxy.update_downstreams(&configs()).await;
        proxy.refresh_filtered_capabilities().await;
        (proxy, factory)
    }

    #[tokio::test]
    async fn test_start_records_preset_and_transitions() {
        let factory = sample_factory();
        let proxy = ProxyMcpServer::new(factory, EngineConfig::default());
        assert_eq!(proxy.status(), ConnectionStatus::Stopped);

        let inbound = InboundDescriptor {
            name: "sse".to_string(),
            details: json!({ "path": "/mcp" }),
        };
        proxy.start(dev_preset(), Some(inbound.clone()));

        assert_eq!(proxy.status(), ConnectionStatus::Running);
        assert_eq!(proxy.active_preset().unwrap().name, "dev");
        assert_eq!(proxy.inbound_endpoint().unwrap(), inbound);
    }

    #[tokio::test]
    async fn test_disabled_servers_get_no_connection() {
        let (proxy, _factory) = started_proxy().await;
        assert_eq!(proxy.downstream_ids(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_refresh_builds_allowed_view() {
        let (proxy, _factory) = started_proxy().await;
        let state = proxy.filtered_state();

        let tool_names: Vec<&str> = state
            .filter
            .capabilities
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(tool_names, vec!["s1:t1", "s2:t2"]);
        assert!(state.filter.allowed_tools.contains("s1:t1"));
        assert!(state.filter.allowed_tools.contains("s2:t2"));
        assert_eq!(state.filter.capabilities.prompts.len(), 1);
        assert_eq!(state.filter.capabilities.resources.len(), 1);
        assert!(state.fetch_failures.is_empty());
        assert!(state.filter.missing_tools.is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_routes_to_owner() {
        let (proxy, factory) = started_proxy().await;

        let result = proxy.call_tool("s1:t1", json!({})).await.unwrap();
        assert_eq!(result, json!({ "server": "s1", "tool": "t1" }));
        assert_eq!(
            factory.client("s1").tool_calls.lock().unwrap().as_slice(),
            ["t1"]
        );
        assert!(factory.client("s2").tool_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_unlisted_tool_is_unknown_target() {
        let (proxy, factory) = started_proxy().await;

        let err = proxy.call_tool("s2:unknown", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::UnknownTarget {
                kind: TargetKind::Tool,
                ..
            }
        ));
        assert!(factory.client("s2").tool_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_existing_tool_outside_preset_not_allowed() {
        let (proxy, factory) = started_proxy().await;

        // Narrow the preset to s1:t1 only; s2:t2 still exists downstream
        proxy
            .apply_preset(Preset::new("narrow").with_tools(vec![ToolReference::new("s1", "t1")]))
            .await;

        let err = proxy.call_tool("s2:t2", json!({})).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotAllowed(_)));
        assert!(factory.client("s2").tool_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_returns_per_request_results() {
        let (proxy, _factory) = started_proxy().await;

        let results = proxy
            .call_tools_batch(vec![
                ToolCallRequest {
                    name: "s1:t1".to_string(),
                    arguments: json!({}),
                },
                ToolCallRequest {
                    name: "s2:unknown".to_string(),
                    arguments: json!({}),
                },
                ToolCallRequest {
                    name: "s2:t2".to_string(),
                    arguments: json!({}),
                },
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap()["server"], "s1");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap()["server"], "s2");
    }

    #[tokio::test]
    async fn test_prompt_and_resource_presence_checks() {
        let (proxy, _factory) = started_proxy().await;

        let result = proxy.get_prompt("p1", json!({})).await.unwrap();
        assert_eq!(result["server"], "s1");

        let err = proxy.get_prompt("ghost", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::UnknownTarget {
                kind: TargetKind::Prompt,
                ..
            }
        ));

        let result = proxy.read_resource("jira://board").await.unwrap();
        assert_eq!(result["server"], "s2");

        let err = proxy.read_resource("missing://x").await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::UnknownTarget {
                kind: TargetKind::Resource,
                ..
            }
        ));
    }

    struct CountingListener {
        count: AtomicUsize,
        last_server_count: AtomicUsize,
    }

    impl CapabilityUpdateListener for CountingListener {
        fn capabilities_updated(&self, all_capabilities: &HashMap<String, ServerCapabilities>) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.last_server_count
                .store(all_capabilities.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_listener_fires_once_per_rebuild() {
        let listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
            last_server_count: AtomicUsize::new(0),
        });
        let factory = sample_factory();
        let proxy = ProxyMcpServer::new(factory, EngineConfig::default())
            .with_listener(listener.clone());
        proxy.start(dev_preset(), None);
        proxy.update_downstreams(&configs()).await;

        proxy.refresh_filtered_capabilities().await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
        assert_eq!(listener.last_server_count.load(Ordering::SeqCst), 2);

        proxy.apply_preset(dev_preset()).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 2);

        proxy.refresh_server_capabilities("s1").await.unwrap();
        assert_eq!(listener.count.load(Ordering::SeqCst), 3);

        proxy.remove_server_capabilities("s2");
        assert_eq!(listener.count.load(Ordering::SeqCst), 4);
        assert_eq!(listener.last_server_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_isolated_and_recorded() {
        let mut caps_by_id = HashMap::new();
        caps_by_id.insert(
            "s1".to_string(),
            ServerCapabilities {
                tools: vec![ToolDescriptor::new("t1")],
                ..ServerCapabilities::default()
            },
        );
        let factory = Arc::new(MockFactory {
            caps_by_id,
            fail_fetch: vec!["s2".to_string()],
            ..MockFactory::default()
        });
        let proxy = ProxyMcpServer::new(factory.clone(), EngineConfig::default());
        proxy.start(dev_preset(), None);
        proxy.update_downstreams(&configs()).await;
        proxy.refresh_filtered_capabilities().await;

        let state = proxy.filtered_state();
        assert!(state.all_capabilities.contains_key("s1"));
        assert!(!state.all_capabilities.contains_key("s2"));
        assert_eq!(state.fetch_failures.len(), 1);
        assert_eq!(state.fetch_failures[0].server_id, "s2");
        // The preset still references s2:t2, now reported missing
        assert_eq!(state.filter.missing_tools.len(), 1);
        assert_eq!(state.filter.missing_tools[0].tool_name, "t2");

        // The healthy server is unaffected
        let result = proxy.call_tool("s1:t1", json!({})).await.unwrap();
        assert_eq!(result["server"], "s1");
    }

    #[tokio::test]
    async fn test_factory_failure_skips_server() {
        let factory = Arc::new(MockFactory {
            fail_create: vec!["s2".to_string()],
            ..MockFactory::default()
        });
        let proxy = ProxyMcpServer::new(factory, EngineConfig::default());
        proxy.update_downstreams(&configs()).await;

        assert_eq!(proxy.downstream_ids(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_remove_server_recomputes_view() {
        let (proxy, _factory) = started_proxy().await;

        proxy.remove_server_capabilities("s2");

        let state = proxy.filtered_state();
        assert!(state.filter.allowed_tools.contains("s1:t1"));
        assert!(!state.filter.allowed_tools.contains("s2:t2"));
        assert_eq!(state.filter.missing_tools.len(), 1);
        assert_eq!(state.filter.missing_tools[0].server_id, "s2");
    }

    #[tokio::test]
    async fn test_update_downstreams_reuses_unchanged_connections() {
        let (proxy, factory) = started_proxy().await;
        assert_eq!(factory.creates.load(Ordering::SeqCst), 2);

        proxy.update_downstreams(&configs()).await;
        assert_eq!(factory.creates.load(Ordering::SeqCst), 2);

        // A config change replaces just that connection
        let mut changed = configs();
        changed[0].name = "Renamed".to_string();
        proxy.update_downstreams(&changed).await;
        assert_eq!(factory.creates.load(Ordering::SeqCst), 3);
        assert_eq!(factory.client("s1").disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_preset_exposes_merged_view() {
        let factory = sample_factory();
        let proxy = ProxyMcpServer::new(factory, EngineConfig::default());
        proxy.update_downstreams(&configs()).await;
        proxy.refresh_filtered_capabilities().await;

        let state = proxy.filtered_state();
        let tool_names: Vec<&str> = state
            .filter
            .capabilities
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(tool_names, vec!["s1:t1", "s2:t2"]);
        assert!(state.filter.allowed_tools.is_empty());

        // Everything is callable and prompt lookup falls back to scanning
        let result = proxy.call_tool("s2:t2", json!({})).await.unwrap();
        assert_eq!(result["server"], "s2");
        let result = proxy.get_prompt("p1", json!({})).await.unwrap();
        assert_eq!(result["server"], "s1");
    }

    #[tokio::test]
    async fn test_stop_disconnects_all() {
        let (proxy, factory) = started_proxy().await;

        proxy.stop().await;

        assert_eq!(proxy.status(), ConnectionStatus::Stopped);
        assert!(factory.client("s1").disconnects.load(Ordering::SeqCst) >= 1);
        assert!(factory.client("s2").disconnects.load(Ordering::SeqCst) >= 1);
    }
}
