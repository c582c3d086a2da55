//! Tool Namespacing
//!
//! Tools from different servers can share a name, so the merged surface
//! exposes them as `{server_id}:{tool_name}`. Server ids may not contain
//! the separator; tool names may, so parsing splits on the first one
//! only. Prompts and resources keep their original names and are
//! disambiguated by routing maps instead.

use std::collections::HashMap;

use muxmcp_shared::ServerCapabilities;

use crate::error::{ProxyError, ProxyResult};

/// Separator between server id and tool name in prefixed names
pub const NAME_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolName {
    pub server_id: String,
    pub tool_name: String,
}

/// Build the consumer-visible name for a downstream tool.
pub fn prefix_tool_name(server_id: &str, tool_name: &str) -> String {
    format!("{}{}{}", server_id, NAME_SEPARATOR, tool_name)
}

/// Split a prefixed name back into server id and tool name. Splits on
/// the first separator only, so tool names containing the separator
/// survive a round trip.
pub fn parse_prefixed_tool_name(prefixed: &str) -> ProxyResult<ParsedToolName> {
    let Some((server_id, tool_name)) = prefixed.split_once(NAME_SEPARATOR) else {
        return Err(ProxyError::configuration(format!(
            "tool name '{}' is missing a server prefix",
            prefixed
        )));
    };

    if server_id.is_empty() || tool_name.is_empty() {
        return Err(ProxyError::configuration(format!(
            "tool name '{}' has an empty server id or tool name",
            prefixed
        )));
    }

    Ok(ParsedToolName {
        server_id: server_id.to_string(),
        tool_name: tool_name.to_string(),
    })
}

/// Merge per-server capability sets into one view with prefixed tool
/// names. Servers are visited in sorted id order so the merged listing
/// is stable across calls; prompts and resources are carried over
/// unprefixed.
pub fn prefix_all_capabilities(
    all: &HashMap<String, ServerCapabilities>,
) -> ServerCapabilities {
    let mut pairs: Vec<(&String, &ServerCapabilities)> = all.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut merged = ServerCapabilities::default();
    for (server_id, caps) in pairs {
        for tool in &caps.tools {
            let mut renamed = tool.clone();
            renamed.name = prefix_tool_name(server_id, &tool.name);
            merged.tools.push(renamed);
        }
        merged.resources.extend(caps.resources.iter().cloned());
        merged.prompts.extend(caps.prompts.iter().cloned());
    }
    merged
}

// ============================================================================
// Tests
// ============================================================================
