//! Engine Data Model
//!
//! Configuration inputs (server roster, presets), UI-facing status types,
//! and the flattened capability snapshot projection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::{PromptDescriptor, ResourceDescriptor, ServerCapabilities, ToolDescriptor};

// =============================================================================
// Server Configuration
// =============================================================================

/// Transport for a downstream server connection
///
/// The engine never interprets this; it is handed to the injected client
/// factory, which owns the wire-level details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportDescriptor {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Http {
        endpoint_url: String,
    },
    Sse {
        endpoint_url: String,
    },
    Websocket {
        endpoint_url: String,
    },
}

/// One downstream server as supplied by configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique, stable key; used as the namespace prefix for tool names
    pub id: String,
    /// Display name
    pub name: String,
    pub transport: TransportDescriptor,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        transport: TransportDescriptor,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport,
            env: HashMap::new(),
            enabled: true,
        }
    }
}

// =============================================================================
// Presets
// =============================================================================

/// Reference to a single tool on a specific server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReference {
    pub server_id: String,
    pub tool_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ToolReference {
    pub fn new(server_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            tool_name: tool_name.into(),
            enabled: true,
        }
    }
}

/// Reference to a prompt on a specific server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptReference {
    pub server_id: String,
    pub prompt_name: String,
}

/// Reference to a resource on a specific server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReference {
    pub server_id: String,
    pub resource_uri: String,
}

/// A named exposure policy: which downstream tools the consumer may see
/// and call. Prompts and resources follow the referenced servers
/// wholesale; the optional reference lists are carried for forward
/// compatibility but do not narrow inclusion today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tools: Vec<ToolReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<PromptReference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceReference>>,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tools: Vec::new(),
            prompts: None,
            resources: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolReference>) -> Self {
        self.tools = tools;
        self
    }
}

// =============================================================================
// Connection Status (UI-facing)
// =============================================================================

/// Per-server status as exposed to observers
///
/// Distinct from the connection lifecycle status: this reflects the
/// refresher's view of whether a server's capabilities are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerConnectionStatus {
    Disabled,
    Connecting,
    Available,
    Error,
}

/// One status transition, as published on the update stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConnectionUpdate {
    pub server_id: String,
    pub status: ServerConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Inbound Endpoint
// =============================================================================

/// Describes the inbound endpoint the embedding application binds.
///
/// Recorded at start for observability; the engine never binds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundDescriptor {
    pub name: String,
    #[serde(default)]
    pub details: Value,
}

// =============================================================================
// Capability Snapshots
// =============================================================================

/// Flattened argument row for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub type_label: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tool with its schema flattened into argument rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub args: Vec<ArgSnapshot>,
}

/// Resource row for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub name: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Prompt with its arguments flattened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub args: Vec<ArgSnapshot>,
}

/// Point-in-time projection of one server's capabilities
///
/// Replaced whole on every successful fetch; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCapsSnapshot {
    pub server_id: String,
    pub server_name: String,
    pub tools: Vec<ToolSnapshot>,
    pub resources: Vec<ResourceSnapshot>,
    pub prompts: Vec<PromptSnapshot>,
    pub fetched_at: DateTime<Utc>,
}

impl ServerCapsSnapshot {
    /// Project raw capabilities into the flattened display form
    pub fn from_capabilities(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        caps: &ServerCapabilities,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            server_name: server_name.into(),
            tools: caps.tools.iter().map(project_tool).collect(),
            resources: caps.resources.iter().map(project_resource).collect(),
            prompts: caps.prompts.iter().map(project_prompt).collect(),
            fetched_at: Utc::now(),
        }
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

fn project_tool(tool: &ToolDescriptor) -> ToolSnapshot {
    ToolSnapshot {
        name: tool.name.clone(),
        description: tool.description.clone(),
        args: schema_args(&tool.input_schema),
    }
}

fn project_resource(resource: &ResourceDescriptor) -> ResourceSnapshot {
    ResourceSnapshot {
        name: resource.name.clone(),
        uri: resource.uri.clone(),
        description: resource.description.clone(),
        mime_type: resource.mime_type.clone(),
    }
}

fn project_prompt(prompt: &PromptDescriptor) -> PromptSnapshot {
    let args = prompt
        .arguments
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|arg| ArgSnapshot {
            name: arg.name.clone(),
            // Prompt arguments are untyped strings on the wire
            type_label: "string".to_string(),
            required: arg.required,
            description: arg.description.clone(),
        })
        .collect();

    PromptSnapshot {
        name: prompt.name.clone(),
        description: prompt.description.clone(),
        args,
    }
}

/// Flatten a JSON schema's `properties` into argument rows
fn schema_args(schema: &Value) -> Vec<ArgSnapshot> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| ArgSnapshot {
            name: name.clone(),
            type_label: infer_type_label(prop),
            required: required.contains(&name.as_str()),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect()
}

/// Best-effort type label from a schema property
fn infer_type_label(prop: &Value) -> String {
    match prop.get("type") {
        Some(Value::String(label)) => label.clone(),
        // Nullable unions like ["string", "null"]: take the first named type
        Some(Value::Array(labels)) => labels
            .iter()
            .filter_map(Value::as_str)
            .find(|label| *label != "null")
            .unwrap_or("any")
            .to_string(),
        _ => "any".to_string(),
    }
}
