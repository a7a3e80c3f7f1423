//! shardcache Test & Validation Infrastructure
//!
//! End-to-end replication scenarios run against in-process source and cache
//! stores, plus property-based convergence tests for the reconciler.

pub mod concurrency_tests;
pub mod harness;
pub mod negative_scenarios;
pub mod proptest_reconcile;
pub mod replication_scenarios;

pub use harness::{eventually, init_tracing, ReplicationFixture};
pub use negative_scenarios::replicate_resource_negative_scenario;
pub use replication_scenarios::replicate_resource_scenario;
