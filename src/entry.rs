//! Cache entry definition and freshness classification.

// self
use crate::_prelude::*;

/// Immutable record of a cached value plus the timestamps that govern its
/// freshness.
///
/// Invariant: `created <= update_after <= expires_after`. Once built an
/// entry never changes; a refresh produces a brand new `CacheEntry` rather
/// than mutating one in place.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
	value: V,
	created: DateTime<Utc>,
	update_after: DateTime<Utc>,
	expires_after: DateTime<Utc>,
}
impl<V> CacheEntry<V> {
	/// Construct an entry, asserting the ordering invariant among the three
	/// timestamps.
	///
	/// # Panics
	/// Panics if `created > update_after` or `update_after > expires_after` —
	/// both are programmer errors in an [`EntryBuilder`](crate::builder::EntryBuilder)
	/// implementation, never a condition a caller can hit at runtime.
	pub fn new(
		value: V,
		created: DateTime<Utc>,
		update_after: DateTime<Utc>,
		expires_after: DateTime<Utc>,
	) -> Self {
		assert!(created <= update_after, "entry created must not be after update_after");
		assert!(update_after <= expires_after, "entry update_after must not be after expires_after");

		Self { value, created, update_after, expires_after }
	}

	/// Cached value.
	pub fn value(&self) -> &V {
		&self.value
	}

	/// Consume the entry, returning the owned value.
	pub fn into_value(self) -> V {
		self.value
	}

	/// Instant the entry was produced.
	pub fn created(&self) -> DateTime<Utc> {
		self.created
	}

	/// Soft freshness boundary; past this the entry is still returnable but
	/// triggers a background refresh.
	pub fn update_after(&self) -> DateTime<Utc> {
		self.update_after
	}

	/// Hard freshness boundary; past this the entry must not be served.
	pub fn expires_after(&self) -> DateTime<Utc> {
		self.expires_after
	}

	/// Classify this entry's freshness at the given instant.
	pub fn classify(&self, now: DateTime<Utc>) -> Freshness {
		if now < self.update_after {
			Freshness::Fresh
		} else if now < self.expires_after {
			Freshness::SoftStale
		} else {
			Freshness::HardExpired
		}
	}
}

/// Freshness tiers an observed [`CacheEntry`] (or its absence) falls into.
///
/// `created + update_after` marks the soft boundary; `created + expire_after`
/// marks the hard one. `Fresh` precedes both, `SoftStale` sits between them,
/// and `HardExpired` follows the second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// `t < update_after`: return directly, no refresh triggered.
	Fresh,
	/// `update_after <= t < expires_after`: return the entry, but schedule a
	/// background refresh.
	SoftStale,
	/// `expires_after <= t`: must not be served; a blocking refresh is required.
	HardExpired,
	/// No entry exists in storage for this key; a blocking refresh is required.
	Missing,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry_at(created: DateTime<Utc>) -> CacheEntry<&'static str> {
		CacheEntry::new(
			"value",
			created,
			created + TimeDelta::seconds(10),
			created + TimeDelta::seconds(20),
		)
	}

	#[test]
	fn classifies_fresh_soft_stale_and_hard_expired() {
		let created = Utc::now();
		let entry = entry_at(created);

		assert_eq!(entry.classify(created), Freshness::Fresh);
		assert_eq!(entry.classify(created + TimeDelta::seconds(9)), Freshness::Fresh);
		assert_eq!(entry.classify(created + TimeDelta::seconds(10)), Freshness::SoftStale);
		assert_eq!(entry.classify(created + TimeDelta::seconds(19)), Freshness::SoftStale);
		assert_eq!(entry.classify(created + TimeDelta::seconds(20)), Freshness::HardExpired);
		assert_eq!(entry.classify(created + TimeDelta::seconds(100)), Freshness::HardExpired);
	}

	#[test]
	#[should_panic(expected = "update_after must not be after expires_after")]
	fn rejects_out_of_order_timestamps() {
		let now = Utc::now();

		CacheEntry::new("value", now, now + TimeDelta::seconds(20), now + TimeDelta::seconds(10));
	}
}
