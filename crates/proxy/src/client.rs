//! Downstream Client Contract
//!
//! The transport seam of the engine. Wire-level client implementations
//! (stdio subprocesses, HTTP, SSE, WebSocket) live outside this crate
//! and are injected through these traits, which keeps the aggregation
//! and routing logic independent of any concrete protocol stack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use muxmcp_shared::{ServerCapabilities, ServerConfig};

use crate::error::{ProxyError, ProxyResult};

/// Protocol-level operations a downstream transport must provide.
///
/// Implementations are expected to be cheap to clone behind an `Arc`
/// and safe to call concurrently; the engine never serializes calls to
/// the same client.
#[async_trait]
pub trait DownstreamClient: Send + Sync {
    async fn connect(&self) -> ProxyResult<()>;

    async fn disconnect(&self) -> ProxyResult<()>;

    /// Fetch the full capability listing (tools, resources, prompts).
    async fn fetch_capabilities(&self) -> ProxyResult<ServerCapabilities>;

    async fn call_tool(&self, name: &str, arguments: Value) -> ProxyResult<Value>;

    async fn get_prompt(&self, name: &str, arguments: Value) -> ProxyResult<Value>;

    async fn read_resource(&self, uri: &str) -> ProxyResult<Value>;
}

/// Builds concrete clients from server configuration. Injected so tests
/// and embedders control the transport without process-wide state.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &ServerConfig) -> ProxyResult<Arc<dyn DownstreamClient>>;
}

/// Standalone capability fetch used by the background refresher. Takes
/// the server config and a timeout bound, returns the listing. Keeping
/// this separate from [`DownstreamClient`] lets the refresher run
/// against short-lived connections that are torn down after the fetch.
pub type CapabilityFetcher = Arc<
    dyn Fn(ServerConfig, Duration) -> BoxFuture<'static, ProxyResult<ServerCapabilities>>
        + Send
        + Sync,
>;

/// Hook invoked with the server id when a proxied call fails in a way
/// that may require re-authorization. The engine treats the decision as
/// opaque; embedders wire this to their credential machinery.
pub type AuthStatusHook = Arc<dyn Fn(&str, &ProxyError) + Send + Sync>;
