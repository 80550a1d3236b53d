//! # Relaymeter Worker
//!
//! Background job runner for the relaymeter control plane. Three periodic
//! jobs run against the shared store:
//!
//! - **record_user_usages**: polls every node for per-user traffic deltas,
//!   scales them by each node's usage coefficient, and folds them into
//!   user totals, admin aggregates, and hour-bucketed ledgers.
//! - **record_node_usages**: polls outbound link counters and folds them
//!   into node totals, system totals, and per-node hour buckets.
//! - **review_users**: walks active and on-hold users, applies plan
//!   rollovers and status transitions, and fires reminder notifications.
//!
//! Each job coalesces: a cycle still in flight when its next tick arrives
//! causes the tick to be skipped rather than stacking a second run.

pub mod accumulator;
pub mod collector;
pub mod proxy;
pub mod reminders;
pub mod reviewer;
pub mod scheduler;
pub mod sources;
pub mod store;
