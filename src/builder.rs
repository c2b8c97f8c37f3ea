//! Timestamp stamping for freshly produced cache values.

// self
use crate::{_prelude::*, entry::CacheEntry};

/// Stamps a raw value into a [`CacheEntry`] using the configured freshness
/// durations (C3 in the component table).
pub trait EntryBuilder<V>: Send + Sync {
	/// Build an entry for `value`, as observed at `now`.
	fn build(&self, now: DateTime<Utc>, value: V) -> CacheEntry<V>;
}

/// Default [`EntryBuilder`]: stamps `update_after`/`expires_after` at fixed
/// offsets from `now`.
#[derive(Clone, Debug)]
pub struct DurationEntryBuilder {
	update_after: Duration,
	expire_after: Duration,
}
impl DurationEntryBuilder {
	/// Construct a builder from the `update_after`/`expire_after` durations.
	///
	/// # Panics
	/// Panics if `expire_after < update_after` — this should already have
	/// been rejected by [`CacheConfigurationBuilder::build`](crate::config::CacheConfigurationBuilder::build).
	pub fn new(update_after: Duration, expire_after: Duration) -> Self {
		assert!(expire_after >= update_after, "expire_after must be >= update_after");

		Self { update_after, expire_after }
	}
}
impl<V> EntryBuilder<V> for DurationEntryBuilder {
	fn build(&self, now: DateTime<Utc>, value: V) -> CacheEntry<V> {
		let update_after = now + chrono_duration(self.update_after);
		let expires_after = now + chrono_duration(self.expire_after);

		CacheEntry::new(value, now, update_after, expires_after)
	}
}

fn chrono_duration(duration: Duration) -> TimeDelta {
	TimeDelta::from_std(duration).unwrap_or(TimeDelta::max_value())
}
