//! Routing table: backend identifier to connection.
//!
//! Provides:
//! - Construction-time validation of identifiers (unique, no separator)
//! - Splitting a namespaced name (`backend/local`) into its parts
//! - Lookup of the owning connection
//!
//! The table is built once and never changes; backends that fail to connect
//! stay addressable so their calls fail with a precise error.

use std::collections::HashMap;

use crate::backend::{BackendConnection, NAMESPACE_SEPARATOR};

use super::errors::ProxyError;

/// Split `backend/local` at the first separator.
///
/// Returns `None` when the name carries no separator. The local part may
/// itself contain separators.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEPARATOR)
}

/// Identifier → connection mapping, in configuration order.
#[derive(Debug)]
pub struct Router {
    backends: Vec<BackendConnection>,
    index: HashMap<String, usize>,
}

impl Router {
    /// Build the table. Fails on an empty, duplicate or separator-carrying
    /// identifier before any backend is contacted.
    pub fn new(backends: Vec<BackendConnection>) -> Result<Self, ProxyError> {
        let mut index = HashMap::with_capacity(backends.len());

        for (position, backend) in backends.iter().enumerate() {
            let id = backend.id();
            if id.is_empty() {
                return Err(ProxyError::InvalidBackendId {
                    id: id.to_string(),
                    reason: "identifier is empty".into(),
                });
            }
            if id.contains(NAMESPACE_SEPARATOR) {
                return Err(ProxyError::InvalidBackendId {
                    id: id.to_string(),
                    reason: format!("identifier must not contain '{NAMESPACE_SEPARATOR}'"),
                });
            }
            if index.insert(id.to_string(), position).is_some() {
                return Err(ProxyError::DuplicateBackend { id: id.to_string() });
            }
        }

        Ok(Self { backends, index })
    }

    /// Look up a backend by identifier.
    pub fn get(&self, id: &str) -> Option<&BackendConnection> {
        self.index.get(id).map(|&position| &self.backends[position])
    }

    /// Resolve a namespaced name to its backend and backend-local name.
    pub fn resolve<'a>(
        &self,
        name: &'a str,
    ) -> Result<(&BackendConnection, &'a str), ProxyError> {
        let unknown = || ProxyError::UnknownBackend {
            name: name.to_string(),
        };
        let (id, local_name) = split_namespaced(name).ok_or_else(unknown)?;
        let backend = self.get(id).ok_or_else(unknown)?;
        Ok((backend, local_name))
    }

    /// All backends in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &BackendConnection> {
        self.backends.iter()
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::backend::testing::FakeLauncher;
    use crate::config::BackendConfig;

    fn backend(id: &str) -> BackendConnection {
        BackendConnection::new(
            BackendConfig::new(id, "fake"),
            Arc::new(FakeLauncher::new()),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_split_namespaced_first_separator() {
        assert_eq!(split_namespaced("fs/read_file"), Some(("fs", "read_file")));
        assert_eq!(split_namespaced("fs/dir/nested"), Some(("fs", "dir/nested")));
        assert_eq!(split_namespaced("plain"), None);
    }

    #[test]
    fn test_one_entry_per_backend() {
        let router = Router::new(vec![backend("alpha"), backend("beta"), backend("gamma")]).unwrap();
        assert_eq!(router.len(), 3);
        assert!(router.get("beta").is_some());
        assert!(router.get("delta").is_none());
        let ids: Vec<&str> = router.iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let err = Router::new(vec![backend("alpha"), backend("beta"), backend("alpha")]).unwrap_err();
        match err {
            ProxyError::DuplicateBackend { id } => assert_eq!(id, "alpha"),
            other => panic!("expected DuplicateBackend, got {other:?}"),
        }
    }

    #[test]
    fn test_separator_in_identifier_rejected() {
        let err = Router::new(vec![backend("team/alpha")]).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidBackendId { .. }));
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let err = Router::new(vec![backend("")]).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidBackendId { .. }));
    }

    #[test]
    fn test_resolve() {
        let router = Router::new(vec![backend("alpha"), backend("beta")]).unwrap();
        let (found, local) = router.resolve("beta/sum").unwrap();
        assert_eq!(found.id(), "beta");
        assert_eq!(local, "sum");

        assert!(matches!(
            router.resolve("unknownBackend/toolX"),
            Err(ProxyError::UnknownBackend { .. })
        ));
        assert!(matches!(
            router.resolve("no-separator"),
            Err(ProxyError::UnknownBackend { .. })
        ));
    }
}
