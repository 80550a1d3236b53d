/// Core StatsSource trait and types
///
/// This module defines the contract every node stats source implements.
/// A source wraps the API of one proxy node and answers two questions:
/// how much traffic did each user push since the last poll, and how much
/// went over the outbound links.
///
/// # Source Contract
///
/// All sources must:
/// 1. Implement the `StatsSource` trait (async)
/// 2. Report per-user counters with `reset = true` semantics: each poll
///    returns the delta since the previous poll and zeroes the counter
/// 3. Report outbound link counters the same way
/// 4. Surface unreachability as an error rather than blocking; the
///    collector applies its own timeout on top
///
/// # Example
///
/// ```no_run
/// use relaymeter_worker::sources::{SourceResult, StatsSource, UserStat, LinkStat};
/// use async_trait::async_trait;
///
/// struct MySource;
///
/// #[async_trait]
/// impl StatsSource for MySource {
///     async fn poll_user_stats(&self, reset: bool) -> SourceResult<Vec<UserStat>> {
///         let _ = reset;
///         Ok(vec![])
///     }
///
///     async fn poll_outbound_stats(&self, reset: bool) -> SourceResult<Vec<LinkStat>> {
///         let _ = reset;
///         Ok(vec![])
///     }
/// }
/// ```
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Stats source error types
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Node agent unreachable
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// Node agent answered with something unusable
    #[error("Malformed stats response: {0}")]
    MalformedResponse(String),

    /// Internal source error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Source result type alias
pub type SourceResult<T> = Result<T, SourceError>;

/// One user's traffic delta as reported by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStat {
    /// The user the traffic belongs to
    pub user_id: Uuid,

    /// Raw bytes since the previous poll, before coefficient scaling
    pub value: i64,
}

/// Outbound link direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    Up,
    Down,
}

/// One outbound link counter delta as reported by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStat {
    pub direction: LinkDirection,

    /// Raw bytes since the previous poll
    pub value: i64,
}

/// Core StatsSource trait
///
/// One implementation per node transport; the mock lives alongside for
/// tests and demos.
///
/// Polls carry no timeout parameter: the collector owns the per-poll
/// budget and wraps every call in `tokio::time::timeout`, so sources
/// stay free of deadline bookkeeping.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Polls per-user traffic deltas
    ///
    /// With `reset = true` the node zeroes its counters after reporting,
    /// so consecutive polls yield disjoint deltas.
    async fn poll_user_stats(&self, reset: bool) -> SourceResult<Vec<UserStat>>;

    /// Polls outbound link counter deltas
    async fn poll_outbound_stats(&self, reset: bool) -> SourceResult<Vec<LinkStat>>;
}

/// A pollable node: identity plus its stats source
#[derive(Clone)]
pub struct NodeHandle {
    /// Node ID; None is the master node
    pub node_id: Option<Uuid>,

    /// Display name for log lines
    pub name: String,

    /// Multiplier applied to raw user traffic before crediting
    pub usage_coefficient: f64,

    /// The transport to poll
    pub source: Arc<dyn StatsSource>,
}

impl NodeHandle {
    /// Handle for the master node (coefficient 1.0)
    pub fn master(source: Arc<dyn StatsSource>) -> Self {
        NodeHandle {
            node_id: None,
            name: "master".to_string(),
            usage_coefficient: 1.0,
            source,
        }
    }
}

/// Registry of currently pollable nodes
///
/// Collection cycles work from a snapshot, so a node added or removed
/// mid-cycle takes effect on the next cycle.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<std::sync::RwLock<Vec<NodeHandle>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the polling set
    pub fn register(&self, handle: NodeHandle) {
        self.nodes.write().unwrap().push(handle);
    }

    /// Removes a node from the polling set
    pub fn unregister(&self, node_id: Option<Uuid>) {
        self.nodes
            .write()
            .unwrap()
            .retain(|h| h.node_id != node_id);
    }

    /// Snapshot of the current polling set
    pub fn snapshot(&self) -> Vec<NodeHandle> {
        self.nodes.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;

    #[async_trait]
    impl StatsSource for EmptySource {
        async fn poll_user_stats(&self, _reset: bool) -> SourceResult<Vec<UserStat>> {
            Ok(vec![])
        }

        async fn poll_outbound_stats(&self, _reset: bool) -> SourceResult<Vec<LinkStat>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_registry_snapshot_is_detached() {
        let registry = NodeRegistry::new();
        registry.register(NodeHandle::master(Arc::new(EmptySource)));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);

        registry.register(NodeHandle {
            node_id: Some(Uuid::new_v4()),
            name: "edge-1".to_string(),
            usage_coefficient: 2.0,
            source: Arc::new(EmptySource),
        });

        // The earlier snapshot does not see the new node
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_registry_unregister() {
        let registry = NodeRegistry::new();
        let node_id = Some(Uuid::new_v4());
        registry.register(NodeHandle::master(Arc::new(EmptySource)));
        registry.register(NodeHandle {
            node_id,
            name: "edge-1".to_string(),
            usage_coefficient: 1.0,
            source: Arc::new(EmptySource),
        });

        registry.unregister(node_id);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].node_id.is_none());
    }
}
