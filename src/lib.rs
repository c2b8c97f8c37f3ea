//! Async memoization engine with two-tier freshness and single-flight
//! refresh coordination — safe, stale-tolerant caching for latency-sensitive
//! in-process calls.
//!
//! The entry point is [`wrapper::Memoized`]: bind a user async callable and
//! a [`config::CacheConfiguration`] together, then call it like the
//! function it wraps. Reads classify the cached entry's freshness
//! ([`entry::Freshness`]) and either return it directly, return it while
//! kicking off a background refresh, or block on a refresh — with at most
//! one refresh in flight per key regardless of how many callers arrive
//! concurrently (see [`coordinator`] and [`tracker`]).

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod builder;
pub mod config;
pub mod entry;
pub mod eviction;
pub mod invalidation;
pub mod key;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod postprocess;
pub mod serde_codec;
pub mod storage;
pub mod wrapper;

mod coordinator;
mod error;
mod tracker;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};

	pub use crate::{Error, Result};
}
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	error::{CachedMethodFailureReason, Error, Result},
	wrapper::{CallOptions, Memoized},
};

#[cfg(test)]
mod _test {
	use metrics_util as _;
	use tracing_subscriber as _;
}
