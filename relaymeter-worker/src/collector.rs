/// Fleet-wide stats collection
///
/// Polls every registered node concurrently, applies per-node usage
/// coefficients, and merges the results into one batch per cycle. A node
/// that fails or times out contributes nothing this cycle; its unreported
/// traffic stays in the node's counters and arrives with the next
/// successful poll.
///
/// # Timeouts
///
/// User-stats polls get 30 seconds, outbound polls 10; a node that blows
/// its budget is logged and treated as empty. At most 10 nodes are polled
/// at once.
use crate::sources::{LinkDirection, NodeHandle, UserStat};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::time::{timeout, Duration};
use tracing::warn;
use uuid::Uuid;

/// Budget for one node's per-user stats poll
pub const USER_STATS_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for one node's outbound stats poll
pub const OUTBOUND_STATS_TIMEOUT: Duration = Duration::from_secs(10);

/// How many nodes are polled concurrently
const POLL_CONCURRENCY: usize = 10;

/// Scales a raw byte count by a node's usage coefficient.
///
/// The product truncates toward zero, matching how credited bytes are
/// stored as integers.
pub fn scale(value: i64, coefficient: f64) -> i64 {
    (value as f64 * coefficient) as i64
}

/// Coefficient-scaled user deltas from one node
#[derive(Debug, Clone)]
pub struct NodeUserUsage {
    /// None = the master node
    pub node_id: Option<Uuid>,
    pub users: Vec<UserStat>,
}

/// One cycle's worth of user traffic across the fleet
#[derive(Debug, Clone, Default)]
pub struct UserStatsBatch {
    /// Scaled deltas per node, for the hour-bucket ledger
    pub per_node: Vec<NodeUserUsage>,

    /// Scaled deltas merged per user across all nodes
    pub totals: HashMap<Uuid, i64>,
}

impl UserStatsBatch {
    /// True when no node reported any traffic
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// Outbound link deltas from one node
#[derive(Debug, Clone)]
pub struct NodeOutbound {
    /// None = the master node
    pub node_id: Option<Uuid>,
    pub uplink: i64,
    pub downlink: i64,
}

/// One cycle's worth of outbound traffic across the fleet
#[derive(Debug, Clone, Default)]
pub struct OutboundBatch {
    pub per_node: Vec<NodeOutbound>,

    /// Fleet-wide sums
    pub uplink: i64,
    pub downlink: i64,
}

/// Polls per-user deltas from every node and merges them
pub async fn collect_user_stats(nodes: &[NodeHandle]) -> UserStatsBatch {
    let per_node: Vec<NodeUserUsage> = futures::stream::iter(nodes.iter().cloned().map(
        |node| async move {
            let users = match timeout(USER_STATS_TIMEOUT, node.source.poll_user_stats(true)).await
            {
                Ok(Ok(stats)) => stats,
                Ok(Err(e)) => {
                    warn!(node = %node.name, error = %e, "user stats poll failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(node = %node.name, "user stats poll timed out");
                    Vec::new()
                }
            };

            let users = users
                .into_iter()
                .map(|s| UserStat {
                    user_id: s.user_id,
                    value: scale(s.value, node.usage_coefficient),
                })
                .filter(|s| s.value != 0)
                .collect();

            NodeUserUsage {
                node_id: node.node_id,
                users,
            }
        },
    ))
    .buffer_unordered(POLL_CONCURRENCY)
    .collect()
    .await;

    let mut totals: HashMap<Uuid, i64> = HashMap::new();
    for node in &per_node {
        for stat in &node.users {
            *totals.entry(stat.user_id).or_default() += stat.value;
        }
    }

    UserStatsBatch { per_node, totals }
}

/// Polls outbound link deltas from every node and merges them
pub async fn collect_outbound_stats(nodes: &[NodeHandle]) -> OutboundBatch {
    let per_node: Vec<NodeOutbound> = futures::stream::iter(nodes.iter().cloned().map(
        |node| async move {
            let links = match timeout(
                OUTBOUND_STATS_TIMEOUT,
                node.source.poll_outbound_stats(true),
            )
            .await
            {
                Ok(Ok(stats)) => stats,
                Ok(Err(e)) => {
                    warn!(node = %node.name, error = %e, "outbound stats poll failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(node = %node.name, "outbound stats poll timed out");
                    Vec::new()
                }
            };

            let (mut uplink, mut downlink) = (0i64, 0i64);
            for link in links {
                match link.direction {
                    LinkDirection::Up => uplink += link.value,
                    LinkDirection::Down => downlink += link.value,
                }
            }

            NodeOutbound {
                node_id: node.node_id,
                uplink,
                downlink,
            }
        },
    ))
    .buffer_unordered(POLL_CONCURRENCY)
    .collect()
    .await;

    let uplink = per_node.iter().map(|n| n.uplink).sum();
    let downlink = per_node.iter().map(|n| n.downlink).sum();

    OutboundBatch {
        per_node,
        uplink,
        downlink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{LinkStat, MockStatsSource, SourceResult, StatsSource};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct HangingSource;

    #[async_trait]
    impl StatsSource for HangingSource {
        async fn poll_user_stats(&self, _reset: bool) -> SourceResult<Vec<UserStat>> {
            futures::future::pending().await
        }

        async fn poll_outbound_stats(&self, _reset: bool) -> SourceResult<Vec<LinkStat>> {
            futures::future::pending().await
        }
    }

    fn handle(node_id: Option<Uuid>, coefficient: f64, source: Arc<dyn StatsSource>) -> NodeHandle {
        NodeHandle {
            node_id,
            name: node_id.map_or("master".to_string(), |id| format!("node-{id}")),
            usage_coefficient: coefficient,
            source,
        }
    }

    #[test]
    fn test_scale_truncates() {
        assert_eq!(scale(1000, 1.0), 1000);
        assert_eq!(scale(1000, 1.5), 1500);
        assert_eq!(scale(999, 0.5), 499);
        assert_eq!(scale(3, 0.33), 0);
    }

    #[tokio::test]
    async fn test_merges_one_user_across_nodes() {
        let user_id = Uuid::new_v4();

        let master = Arc::new(MockStatsSource::new());
        master.push_user_stat(user_id, 1000);
        let edge = Arc::new(MockStatsSource::new());
        edge.push_user_stat(user_id, 1000);

        let nodes = vec![
            handle(None, 1.0, master),
            handle(Some(Uuid::new_v4()), 2.0, edge),
        ];

        let batch = collect_user_stats(&nodes).await;
        // 1000 from the master plus 1000 * 2.0 from the edge node
        assert_eq!(batch.totals[&user_id], 3000);
        assert_eq!(batch.per_node.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_deltas_are_dropped() {
        let source = Arc::new(MockStatsSource::new());
        source.push_user_stat(Uuid::new_v4(), 0);

        let batch = collect_user_stats(&[handle(None, 1.0, source)]).await;
        assert!(batch.is_empty());
        assert!(batch.per_node[0].users.is_empty());
    }

    #[tokio::test]
    async fn test_failed_node_contributes_nothing() {
        let user_id = Uuid::new_v4();
        let healthy = Arc::new(MockStatsSource::new());
        healthy.push_user_stat(user_id, 500);
        let broken = Arc::new(MockStatsSource::new());
        broken.push_user_stat(user_id, 9999);
        broken.set_failing(true);

        let broken_id = Some(Uuid::new_v4());
        let nodes = vec![handle(None, 1.0, healthy), handle(broken_id, 1.0, broken)];

        let batch = collect_user_stats(&nodes).await;
        assert_eq!(batch.totals[&user_id], 500);
        let broken_entry = batch
            .per_node
            .iter()
            .find(|n| n.node_id == broken_id)
            .unwrap();
        assert!(broken_entry.users.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_node_times_out() {
        let user_id = Uuid::new_v4();
        let healthy = Arc::new(MockStatsSource::new());
        healthy.push_user_stat(user_id, 500);

        let nodes = vec![
            handle(None, 1.0, healthy),
            handle(Some(Uuid::new_v4()), 1.0, Arc::new(HangingSource)),
        ];

        let batch = collect_user_stats(&nodes).await;
        assert_eq!(batch.totals[&user_id], 500);
    }

    #[tokio::test]
    async fn test_outbound_sums_directions() {
        let source = Arc::new(MockStatsSource::new());
        source.push_outbound_stat(LinkStat {
            direction: LinkDirection::Up,
            value: 100,
        });
        source.push_outbound_stat(LinkStat {
            direction: LinkDirection::Down,
            value: 300,
        });
        source.push_outbound_stat(LinkStat {
            direction: LinkDirection::Up,
            value: 50,
        });

        let batch = collect_outbound_stats(&[handle(None, 1.0, source)]).await;
        assert_eq!(batch.uplink, 150);
        assert_eq!(batch.downlink, 300);
    }
}
