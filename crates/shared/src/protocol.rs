//! Downstream Capability Descriptors
//!
//! Wire-level descriptions of what a downstream server exposes: tools,
//! resources, and prompts. These are produced by a capability fetch and
//! treated as immutable snapshots from then on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool exposed by a downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl ToolDescriptor {
    /// Minimal descriptor with an empty object schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: serde_json::json!({}),
            output_schema: None,
            annotations: None,
        }
    }
}

/// A resource exposed by a downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }

    /// Routing key for this resource: the uri when present, else the name
    pub fn routing_key(&self) -> &str {
        if self.uri.is_empty() {
            &self.name
        } else {
            &self.uri
        }
    }
}

/// A prompt template exposed by a downstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

impl PromptDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: None,
        }
    }
}

/// Argument for a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Everything a single downstream server exposes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
}

impl ServerCapabilities {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }

    /// Look up a tool by its unprefixed name
    pub fn tool_named(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Look up a prompt by name
    pub fn prompt_named(&self, name: &str) -> Option<&PromptDescriptor> {
        self.prompts.iter().find(|p| p.name == name)
    }

    /// Look up a resource by its routing key (uri, or name when uri is empty)
    pub fn resource_for_key(&self, key: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.routing_key() == key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_descriptor_parsing() {
        let json = r#"{
            "name": "create_issue",
            "description": "Create a new issue",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": {"type": "string"}
                }
            }
        }"#;

        let tool: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "create_issue");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.output_schema.is_none());
    }

    #[test]
    fn test_capabilities_default_fields() {
        let caps: ServerCapabilities = serde_json::from_str(r#"{"tools": []}"#).unwrap();
        assert!(caps.is_empty());
    }

    #[test]
    fn test_tool_lookup() {
        let caps = ServerCapabilities {
            tools: vec![ToolDescriptor::new("t1"), ToolDescriptor::new("t2")],
            ..Default::default()
        };

        assert!(caps.tool_named("t1").is_some());
        assert!(caps.tool_named("t3").is_none());
    }

    #[test]
    fn test_resource_routing_key() {
        let with_uri = ResourceDescriptor::new("users", "postgres://table/users");
        assert_eq!(with_uri.routing_key(), "postgres://table/users");

        let without_uri = ResourceDescriptor::new("users", "");
        assert_eq!(without_uri.routing_key(), "users");
    }

    #[test]
    fn test_prompt_argument_required_default() {
        let json = r#"{"name": "topic"}"#;
        let arg: PromptArgument = serde_json::from_str(json).unwrap();
        assert!(!arg.required);
    }
}
