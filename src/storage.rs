//! Keyed storage contract (C4) and a concrete in-memory default.

// std
use std::{collections::HashMap, hash::Hash};
// crates.io
use tokio::sync::RwLock;
// self
use crate::{_prelude::*, entry::CacheEntry};

/// Keyed get/offer/release contract for a cache backend.
///
/// Storage is deliberately unaware of freshness — it stores and returns
/// whatever [`CacheEntry`] it is given; the [coordinator](crate::coordinator)
/// is the only component that interprets timestamps. Implementations may
/// internally apply a [`SerDe`](crate::serde_codec::SerDe) to encode values;
/// that composition is transparent to callers of this trait.
#[async_trait::async_trait]
pub trait Storage<K, V>: Send + Sync
where
	K: Send + Sync,
	V: Send + Sync,
{
	/// Look up the entry stored for `key`, if any.
	///
	/// A read failure should be logged by the implementation and returned as
	/// `Err`; the coordinator's caller degrades this to "missing" per the
	/// propagation policy rather than surfacing the storage error directly.
	async fn get(&self, key: &K) -> Result<Option<Arc<CacheEntry<V>>>>;

	/// Replace any existing row for `key` with `entry`.
	async fn offer(&self, key: K, entry: Arc<CacheEntry<V>>) -> Result<()>;

	/// Best-effort removal of `key`.
	async fn release(&self, key: &K) -> Result<()>;
}

/// In-memory [`Storage`] backed by a [`tokio::sync::RwLock`]-guarded map.
///
/// This is the crate's reference implementation, usable out of the box
/// without implementing the trait yourself. Production deployments needing
/// cross-process sharing should implement [`Storage`] against their own
/// backend instead.
#[derive(Debug)]
pub struct InMemoryStorage<K, V> {
	rows: RwLock<HashMap<K, Arc<CacheEntry<V>>>>,
}
impl<K, V> InMemoryStorage<K, V> {
	/// Construct an empty in-memory store.
	pub fn new() -> Self {
		Self { rows: RwLock::new(HashMap::new()) }
	}

	/// Number of rows currently stored; primarily useful in tests and
	/// eviction-policy wiring.
	pub async fn len(&self) -> usize {
		self.rows.read().await.len()
	}

	/// Whether the store currently holds no rows.
	pub async fn is_empty(&self) -> bool {
		self.rows.read().await.is_empty()
	}
}
impl<K, V> Default for InMemoryStorage<K, V> {
	fn default() -> Self {
		Self::new()
	}
}
#[async_trait::async_trait]
impl<K, V> Storage<K, V> for InMemoryStorage<K, V>
where
	K: Eq + Hash + Clone + Send + Sync,
	V: Send + Sync,
{
	async fn get(&self, key: &K) -> Result<Option<Arc<CacheEntry<V>>>> {
		Ok(self.rows.read().await.get(key).cloned())
	}

	async fn offer(&self, key: K, entry: Arc<CacheEntry<V>>) -> Result<()> {
		self.rows.write().await.insert(key, entry);

		Ok(())
	}

	async fn release(&self, key: &K) -> Result<()> {
		self.rows.write().await.remove(key);

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builder::{DurationEntryBuilder, EntryBuilder};

	#[tokio::test]
	async fn round_trips_an_entry_through_offer_and_get() {
		let storage: InMemoryStorage<&str, &str> = InMemoryStorage::new();
		let builder = DurationEntryBuilder::new(Duration::from_secs(1), Duration::from_secs(2));
		let entry = Arc::new(builder.build(Utc::now(), "value"));

		assert!(storage.get(&"k").await.unwrap().is_none());

		storage.offer("k", entry.clone()).await.unwrap();

		let fetched = storage.get(&"k").await.unwrap().expect("entry present");

		assert_eq!(fetched.value(), &"value");
		assert_eq!(storage.len().await, 1);

		storage.release(&"k").await.unwrap();

		assert!(storage.get(&"k").await.unwrap().is_none());
		assert!(storage.is_empty().await);
	}
}
