//! Victim-nomination contract (C5) and three ready-to-use policies.

// std
use std::{
	cell::RefCell,
	collections::{HashSet, VecDeque},
	hash::Hash,
	sync::Mutex,
};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Observes read/write/release events for a cache and nominates the next
/// key to release.
///
/// The coordinator treats nominations as advisory: a nomination produces a
/// best-effort background [`Storage::release`](crate::storage::Storage::release)
/// that never delays the calling request and whose failure is swallowed.
pub trait EvictionStrategy<K>: Send + Sync {
	/// Record that `key` was read (cache hit, fresh or soft-stale).
	fn mark_read(&self, key: &K);

	/// Record that `key` was (re)written with a freshly produced entry.
	fn mark_written(&self, key: &K);

	/// Record that `key` was released from storage.
	fn mark_released(&self, key: &K);

	/// Ask whether a key should be nominated for release right now.
	fn next_to_release(&self) -> Option<K>;
}

/// [`EvictionStrategy`] that never nominates a victim.
///
/// This is the default for configurations that rely solely on
/// `update_after`/`expire_after` to bound memory, or that delegate
/// eviction entirely to the storage backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEvictionStrategy;
impl<K> EvictionStrategy<K> for NoopEvictionStrategy {
	fn mark_read(&self, _key: &K) {}

	fn mark_written(&self, _key: &K) {}

	fn mark_released(&self, _key: &K) {}

	fn next_to_release(&self) -> Option<K> {
		None
	}
}

/// Least-recently-read eviction policy bounded by a fixed capacity.
///
/// Nominates the least-recently-touched key once the number of tracked keys
/// exceeds `capacity`. Recency is updated on both read and write.
#[derive(Debug)]
pub struct LruEvictionStrategy<K> {
	capacity: usize,
	state: Mutex<LruState<K>>,
}
#[derive(Debug, Default)]
struct LruState<K> {
	order: VecDeque<K>,
	tracked: HashSet<K>,
}
impl<K> LruEvictionStrategy<K>
where
	K: Clone + Eq + Hash,
{
	/// Construct a policy that nominates victims once more than `capacity`
	/// distinct keys are tracked.
	pub fn new(capacity: usize) -> Self {
		Self { capacity, state: Mutex::new(LruState::default()) }
	}

	fn touch(&self, key: &K) {
		let mut state = self.state.lock().expect("eviction state mutex poisoned");

		if state.tracked.insert(key.clone()) {
			state.order.push_back(key.clone());
		} else if let Some(position) = state.order.iter().position(|existing| existing == key) {
			state.order.remove(position);
			state.order.push_back(key.clone());
		}
	}
}
impl<K> EvictionStrategy<K> for LruEvictionStrategy<K>
where
	K: Clone + Eq + Hash + Send + Sync,
{
	fn mark_read(&self, key: &K) {
		self.touch(key);
	}

	fn mark_written(&self, key: &K) {
		self.touch(key);
	}

	fn mark_released(&self, key: &K) {
		let mut state = self.state.lock().expect("eviction state mutex poisoned");

		state.tracked.remove(key);
		if let Some(position) = state.order.iter().position(|existing| existing == key) {
			state.order.remove(position);
		}
	}

	fn next_to_release(&self) -> Option<K> {
		let state = self.state.lock().expect("eviction state mutex poisoned");

		if state.tracked.len() > self.capacity { state.order.front().cloned() } else { None }
	}
}

/// Eviction policy that nominates a uniformly random tracked key once a
/// configured capacity is exceeded.
///
/// Cheaper to maintain than LRU under heavy write churn since it need not
/// track recency order, at the cost of occasionally evicting a hot key —
/// the same trade-off Redis documents for its `allkeys-random` policy.
#[derive(Debug)]
pub struct RandomEvictionStrategy<K> {
	capacity: usize,
	tracked: Mutex<Vec<K>>,
}
impl<K> RandomEvictionStrategy<K>
where
	K: Clone + Eq,
{
	/// Construct a policy that nominates a random victim once more than
	/// `capacity` distinct keys are tracked.
	pub fn new(capacity: usize) -> Self {
		Self { capacity, tracked: Mutex::new(Vec::new()) }
	}

	fn touch(&self, key: &K) {
		let mut tracked = self.tracked.lock().expect("eviction state mutex poisoned");

		if !tracked.contains(key) {
			tracked.push(key.clone());
		}
	}
}
impl<K> EvictionStrategy<K> for RandomEvictionStrategy<K>
where
	K: Clone + Eq + Send + Sync,
{
	fn mark_read(&self, _key: &K) {}

	fn mark_written(&self, key: &K) {
		self.touch(key);
	}

	fn mark_released(&self, key: &K) {
		let mut tracked = self.tracked.lock().expect("eviction state mutex poisoned");

		tracked.retain(|existing| existing != key);
	}

	fn next_to_release(&self) -> Option<K> {
		let tracked = self.tracked.lock().expect("eviction state mutex poisoned");

		if tracked.len() <= self.capacity {
			return None;
		}

		let index = SMALL_RNG.with_borrow_mut(|rng| rng.random_range(0..tracked.len()));

		tracked.get(index).cloned()
	}
}
