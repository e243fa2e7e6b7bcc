//! Fan-out across running backends and merge of their listings.
//!
//! Results are concatenated in configuration order regardless of which
//! backend answers first. Each backend's listing failure has already been
//! degraded to an empty list by the connection, so one backend can neither
//! block nor void the aggregate.
//!
//! The resource ownership table is an immutable snapshot swapped in whole by
//! every `list_resources`. Between two listings a URI keeps routing to the
//! backend that last reported it, even if that backend has since dropped it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::join_all;

use crate::backend::{BackendConnection, BackendStatus, Prompt, Resource, Tool};

use super::router::Router;

/// Resource URI → owning backend identifier.
pub type OwnershipTable = HashMap<String, String>;

/// Merges listings and tracks resource ownership.
#[derive(Debug, Default)]
pub struct Aggregator {
    ownership: RwLock<Arc<OwnershipTable>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn running(router: &Router) -> impl Iterator<Item = &BackendConnection> {
        router
            .iter()
            .filter(|backend| backend.status() == BackendStatus::Running)
    }

    /// Namespaced tools of every running backend.
    pub async fn list_tools(&self, router: &Router) -> Vec<Tool> {
        let listings = join_all(Self::running(router).map(|backend| backend.list_tools())).await;
        listings.into_iter().flatten().collect()
    }

    /// Namespaced prompts of every running backend.
    pub async fn list_prompts(&self, router: &Router) -> Vec<Prompt> {
        let listings = join_all(Self::running(router).map(|backend| backend.list_prompts())).await;
        listings.into_iter().flatten().collect()
    }

    /// Resources of every running backend. Replaces the ownership snapshot
    /// with the owners seen in this listing.
    pub async fn list_resources(&self, router: &Router) -> Vec<Resource> {
        let listings = join_all(Self::running(router).map(|backend| async move {
            (backend.id(), backend.list_resources().await)
        }))
        .await;

        let mut table = OwnershipTable::new();
        let mut merged = Vec::new();
        for (owner, resources) in listings {
            for resource in &resources {
                if let Some(previous) = table.insert(resource.uri.clone(), owner.to_string()) {
                    if previous != owner {
                        tracing::warn!(
                            uri = %resource.uri,
                            previous = %previous,
                            owner,
                            "resource reported by several backends; last one wins"
                        );
                    }
                }
            }
            merged.extend(resources);
        }

        tracing::debug!(
            resources = merged.len(),
            owners = table.len(),
            "replacing resource ownership snapshot"
        );
        self.replace_ownership(table);
        merged
    }

    fn replace_ownership(&self, table: OwnershipTable) {
        let snapshot = Arc::new(table);
        match self.ownership.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Current ownership snapshot.
    pub fn ownership(&self) -> Arc<OwnershipTable> {
        match self.ownership.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Identifier of the backend that last reported `uri`.
    pub fn owner_of(&self, uri: &str) -> Option<String> {
        self.ownership().get(uri).cloned()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
