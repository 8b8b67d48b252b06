//! Versioned entity indexer.
//!
//! Consumes a stream of entity updates, persists each one, and arms a delayed
//! callback per update that a newer version of the same entity supersedes.
//! Once the stream is exhausted and a drain grace period has passed, the
//! entity holding the highest metric is reported.

pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod indexer;
pub mod migrate;
pub mod scheduler;
pub mod source;
pub mod storage;
