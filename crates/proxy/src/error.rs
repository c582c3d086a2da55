//! Engine Error Types
//!
//! One error enum for the whole engine so callers can branch on kind
//! without string matching. Transport internals stay opaque behind
//! `anyhow::Error`.

use std::time::Duration;

use thiserror::Error;

/// What kind of thing a request failed to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Server,
    Tool,
    Prompt,
    Resource,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TargetKind::Server => "server",
            TargetKind::Tool => "tool",
            TargetKind::Prompt => "prompt",
            TargetKind::Resource => "resource",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connect attempts to a downstream server were exhausted.
    #[error("connection to server '{server_id}' failed: {message}")]
    Connection { server_id: String, message: String },

    /// An operation exceeded its configured bound. Carries the bound so
    /// callers can report exactly which limit was hit.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Opaque failure from a downstream transport.
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Invalid input or engine configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Tool exists but sits outside the active preset's allow-list.
    #[error("tool '{0}' is not allowed by the current preset")]
    NotAllowed(String),

    /// No live server, tool, prompt, or resource matches the request.
    #[error("unknown {kind} '{name}'")]
    UnknownTarget { kind: TargetKind, name: String },
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    pub fn connection(server_id: impl Into<String>, message: impl Into<String>) -> Self {
        ProxyError::Connection {
            server_id: server_id.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: &'static str, bound: Duration) -> Self {
        ProxyError::Timeout {
            operation,
            timeout_ms: bound.as_millis() as u64,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ProxyError::Transport(anyhow::anyhow!(message.into()))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ProxyError::Configuration(message.into())
    }

    pub fn unknown(kind: TargetKind, name: impl Into<String>) -> Self {
        ProxyError::UnknownTarget {
            kind,
            name: name.into(),
        }
    }

    /// Returns true if retrying the operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProxyError::Connection { .. } | ProxyError::Timeout { .. } | ProxyError::Transport(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ProxyError::connection("analytics", "socket closed");
        assert_eq!(
            err.to_string(),
            "connection to server 'analytics' failed: socket closed"
        );

        let err = ProxyError::timeout("tools/call", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "tools/call timed out after 1500ms");

        let err = ProxyError::NotAllowed("files:delete".to_string());
        assert_eq!(
            err.to_string(),
            "tool 'files:delete' is not allowed by the current preset"
        );

        let err = ProxyError::unknown(TargetKind::Prompt, "summarize");
        assert_eq!(err.to_string(), "unknown prompt 'summarize'");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProxyError::connection("s1", "refused").is_transient());
        assert!(ProxyError::timeout("connect", Duration::from_secs(10)).is_transient());
        assert!(ProxyError::transport("pipe broke").is_transient());

        assert!(!ProxyError::configuration("bad preset").is_transient());
        assert!(!ProxyError::NotAllowed("t".to_string()).is_transient());
        assert!(!ProxyError::unknown(TargetKind::Server, "gone").is_transient());
    }

    #[test]
    fn test_transport_from_anyhow() {
        let source = anyhow::anyhow!("stdin closed unexpectedly");
        let err: ProxyError = source.into();
        assert!(matches!(err, ProxyError::Transport(_)));
        assert!(err.to_string().contains("stdin closed unexpectedly"));
    }

    #[test]
    fn test_target_kind_labels() {
        assert_eq!(TargetKind::Server.to_string(), "server");
        assert_eq!(TargetKind::Tool.to_string(), "tool");
        assert_eq!(TargetKind::Prompt.to_string(), "prompt");
        assert_eq!(TargetKind::Resource.to_string(), "resource");
    }
}
