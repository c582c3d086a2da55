//! Preset Filtering
//!
//! Turns the raw per-server capability map plus a preset into the
//! consumer-visible view: namespaced tool listing, the allow-list the
//! dispatcher enforces, and routing maps for prompts and resources.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use muxmcp_shared::{Preset, ServerCapabilities};

use crate::namespace;

/// A preset tool reference that matched nothing downstream. Surfaced as
/// a diagnostic; the view is still produced without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTool {
    pub server_id: String,
    pub tool_name: String,
}

/// Derived view for one (capability map, preset) pair.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterResult {
    /// Capabilities visible to the consumer, tool names prefixed
    pub capabilities: ServerCapabilities,
    /// Prefixed tool names the dispatcher accepts; empty means allow all
    pub allowed_tools: HashSet<String>,
    /// Preset references that matched nothing downstream
    pub missing_tools: Vec<MissingTool>,
    /// Prompt name to owning server id
    pub prompt_servers: HashMap<String, String>,
    /// Resource routing key to owning server id
    pub resource_servers: HashMap<String, String>,
}

impl FilterResult {
    pub fn allows(&self, prefixed_name: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.contains(prefixed_name)
    }
}

/// Apply a preset to the raw capability map.
///
/// Tools: exactly the enabled references that exist downstream, renamed
/// to their prefixed form. Prompts and resources: everything from each
/// server the preset references, in the order servers are first
/// referenced; name collisions keep the first owner.
pub fn apply_preset(all: &HashMap<String, ServerCapabilities>, preset: &Preset) -> FilterResult {
    let mut result = FilterResult::default();

    // Servers in scope, ordered by first enabled reference
    let mut in_scope: Vec<&str> = Vec::new();
    for reference in preset.tools.iter().filter(|r| r.enabled) {
        if !in_scope.contains(&reference.server_id.as_str()) {
            in_scope.push(&reference.server_id);
        }
    }

    for reference in preset.tools.iter().filter(|r| r.enabled) {
        let tool = all
            .get(&reference.server_id)
            .and_then(|caps| caps.tool_named(&reference.tool_name));

        let Some(tool) = tool else {
            tracing::warn!(
                server_id = %reference.server_id,
                tool_name = %reference.tool_name,
                "Preset references a tool no server currently exposes"
            );
            result.missing_tools.push(MissingTool {
                server_id: reference.server_id.clone(),
                tool_name: reference.tool_name.clone(),
            });
            continue;
        };

        let prefixed = namespace::prefix_tool_name(&reference.server_id, &reference.tool_name);
        if !result.allowed_tools.insert(prefixed.clone()) {
            // Duplicate reference in the preset; already exposed
            continue;
        }

        let mut renamed = tool.clone();
        renamed.name = prefixed;
        result.capabilities.tools.push(renamed);
    }

    for server_id in in_scope {
        let Some(caps) = all.get(server_id) else {
            continue;
        };
        for prompt in &caps.prompts {
            result
                .prompt_servers
                .entry(prompt.name.clone())
                .or_insert_with(|| server_id.to_string());
            result.capabilities.prompts.push(prompt.clone());
        }
        for resource in &caps.resources {
            result
                .resource_servers
                .entry(resource.routing_key().to_string())
                .or_insert_with(|| server_id.to_string());
            result.capabilities.resources.push(resource.clone());
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
