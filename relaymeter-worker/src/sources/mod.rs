/// Stats source implementations
///
/// A stats source is the polling surface of one proxy node: it reports
/// per-user traffic deltas and outbound link counters. The registry holds
/// one handle per pollable node, plus one for the master node the control
/// plane runs on.
pub mod mock;
pub mod source_trait;

pub use mock::MockStatsSource;
pub use source_trait::{
    LinkDirection, LinkStat, NodeHandle, NodeRegistry, SourceError, SourceResult, StatsSource,
    UserStat,
};
