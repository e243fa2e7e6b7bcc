//! Proxy error types.

use thiserror::Error;

use crate::backend::errors::McpError;
use crate::backend::types::error_codes;

/// Errors raised by the proxy core.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration could not be read or is malformed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// Two backends share one identifier.
    #[error("duplicate backend identifier: '{id}'")]
    DuplicateBackend { id: String },

    /// A backend identifier cannot be used as a namespace prefix.
    #[error("invalid backend identifier '{id}': {reason}")]
    InvalidBackendId { id: String, reason: String },

    /// A namespaced name does not start with a known backend identifier.
    #[error("unknown backend for '{name}'")]
    UnknownBackend { name: String },

    /// A resource URI was never reported by any backend listing.
    #[error("unknown resource: '{uri}'")]
    UnknownResource { uri: String },

    /// The addressed backend failed; forwarded as-is.
    #[error(transparent)]
    Backend(#[from] McpError),
}

impl ProxyError {
    /// Whether this error aborts startup.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::DuplicateBackend { .. } | Self::InvalidBackendId { .. }
        )
    }

    /// JSON-RPC error code a frontend should answer with.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::UnknownBackend { .. } | Self::UnknownResource { .. } => {
                error_codes::INVALID_PARAMS
            }
            Self::Backend(McpError::ServerError { code, .. }) => *code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Extra error data to forward, when the backend supplied some.
    pub fn rpc_data(&self) -> Option<serde_json::Value> {
        match self {
            Self::Backend(McpError::ServerError { data, .. }) => data.clone(),
            _ => None,
        }
    }

    /// Message a frontend should answer with. Backend JSON-RPC errors keep
    /// their original message.
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Backend(McpError::ServerError { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_errors_are_invalid_params() {
        let err = ProxyError::UnknownBackend { name: "x/y".into() };
        assert_eq!(err.rpc_code(), error_codes::INVALID_PARAMS);
        assert_eq!(err.to_string(), "unknown backend for 'x/y'");

        let err = ProxyError::UnknownResource { uri: "file:///a".into() };
        assert_eq!(err.rpc_code(), error_codes::INVALID_PARAMS);
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_backend_server_error_forwarded_verbatim() {
        let err = ProxyError::from(McpError::ServerError {
            code: -32001,
            message: "file not found".into(),
            data: Some(serde_json::json!({"path": "/x"})),
        });
        assert_eq!(err.rpc_code(), -32001);
        assert_eq!(err.rpc_message(), "file not found");
        assert_eq!(err.rpc_data().unwrap()["path"], "/x");
    }

    #[test]
    fn test_config_errors() {
        assert!(ProxyError::DuplicateBackend { id: "a".into() }.is_config_error());
        assert!(ProxyError::Config { reason: "bad".into() }.is_config_error());
    }
}
