/// Mock stats source for testing and demos
///
/// Reports a configurable set of per-user deltas and link counters, and
/// can be flipped into a failing state to simulate an unreachable node.
/// It's useful for:
/// - Testing the collector and recording jobs without live nodes
/// - Running the worker as a demo deployment with no agents attached
///
/// # Example
///
/// ```
/// use relaymeter_worker::sources::{MockStatsSource, StatsSource, UserStat};
/// use uuid::Uuid;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source = MockStatsSource::new();
/// let user_id = Uuid::new_v4();
/// source.push_user_stat(user_id, 4096);
///
/// let stats = source.poll_user_stats(true).await.unwrap();
/// assert_eq!(stats, vec![UserStat { user_id, value: 4096 }]);
///
/// // reset = true drained the counters
/// assert!(source.poll_user_stats(true).await.unwrap().is_empty());
/// # }
/// ```
use crate::sources::{LinkStat, SourceError, SourceResult, StatsSource, UserStat};
use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    user_stats: Vec<UserStat>,
    outbound_stats: Vec<LinkStat>,
    failing: bool,
}

/// Mock stats source implementation
#[derive(Default)]
pub struct MockStatsSource {
    state: Mutex<MockState>,
}

impl MockStatsSource {
    /// Creates an empty mock source
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a per-user delta for the next poll
    pub fn push_user_stat(&self, user_id: Uuid, value: i64) {
        self.state
            .lock()
            .unwrap()
            .user_stats
            .push(UserStat { user_id, value });
    }

    /// Queues an outbound link delta for the next poll
    pub fn push_outbound_stat(&self, stat: LinkStat) {
        self.state.lock().unwrap().outbound_stats.push(stat);
    }

    /// Makes every subsequent poll fail as unreachable
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }
}

#[async_trait]
impl StatsSource for MockStatsSource {
    async fn poll_user_stats(&self, reset: bool) -> SourceResult<Vec<UserStat>> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(SourceError::Unreachable("mock node down".to_string()));
        }
        if reset {
            Ok(std::mem::take(&mut state.user_stats))
        } else {
            Ok(state.user_stats.clone())
        }
    }

    async fn poll_outbound_stats(&self, reset: bool) -> SourceResult<Vec<LinkStat>> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(SourceError::Unreachable("mock node down".to_string()));
        }
        if reset {
            Ok(std::mem::take(&mut state.outbound_stats))
        } else {
            Ok(state.outbound_stats.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::LinkDirection;

    #[tokio::test]
    async fn test_poll_without_reset_keeps_counters() {
        let source = MockStatsSource::new();
        let user_id = Uuid::new_v4();
        source.push_user_stat(user_id, 100);

        let first = source.poll_user_stats(false).await.unwrap();
        let second = source.poll_user_stats(false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_with_reset_drains() {
        let source = MockStatsSource::new();
        source.push_outbound_stat(LinkStat {
            direction: LinkDirection::Up,
            value: 512,
        });

        let first = source.poll_outbound_stats(true).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(source.poll_outbound_stats(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_source_errors() {
        let source = MockStatsSource::new();
        source.set_failing(true);

        assert!(source.poll_user_stats(true).await.is_err());
        assert!(source.poll_outbound_stats(true).await.is_err());

        source.set_failing(false);
        assert!(source.poll_user_stats(true).await.is_ok());
    }
}
