//! MuxMCP Proxy Engine
//!
//! Aggregates any number of downstream MCP servers behind a single
//! merged endpoint. A preset picks which tools are exposed; tool names
//! are prefixed with their server id so same-named tools on different
//! servers never collide.
//!
//! # Architecture
//!
//! ```text
//! Client --> ProxyMcpServer --> DownstreamConnection 1 (github)
//!             |  filtered   --> DownstreamConnection 2 (jira)
//!             |  view       --> DownstreamConnection N (...)
//!             v
//!        RequestDispatcher routes `{server_id}:{tool}` to its owner
//! ```
//!
//! # Features
//!
//! - Tool namespacing: `{server_id}:{tool_name}` to prevent conflicts
//! - Preset filtering: expose only an allow-listed subset of tools
//! - Partial failure handling: one bad server never hides the rest
//! - Capability caching with TTL, stale fallback, and background refresh

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod namespace;
pub mod refresher;
pub mod server;
pub mod status;

pub use cache::{CacheStats, CapabilityCache};
pub use client::{AuthStatusHook, CapabilityFetcher, ClientFactory, DownstreamClient};
pub use config::{ConfigError, EngineConfig};
pub use connection::{ConnectionStatus, DownstreamConnection, RetrySettings, TimeoutSettings};
pub use dispatch::{RequestDispatcher, RoutingMaps, ToolCallRequest};
pub use error::{ProxyError, ProxyResult, TargetKind};
pub use filter::{apply_preset, FilterResult, MissingTool};
pub use namespace::{
    parse_prefixed_tool_name, prefix_all_capabilities, prefix_tool_name, ParsedToolName,
    NAME_SEPARATOR,
};
pub use refresher::{CapabilityRefresher, SnapshotListener};
pub use server::{CapabilityUpdateListener, FetchFailure, FilteredState, ProxyMcpServer};
pub use status::ServerStatusTracker;
