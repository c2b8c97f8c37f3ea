//! Cache configuration: every per-callable tunable, built once and frozen
//! into an immutable snapshot for the duration of each call.

// self
use crate::{
	_prelude::*,
	builder::{DurationEntryBuilder, EntryBuilder},
	eviction::{EvictionStrategy, NoopEvictionStrategy},
	key::{DefaultKeyExtractor, KeyExtractor},
	postprocess::{Identity, PostProcessor},
	storage::{InMemoryStorage, Storage},
};

/// Default bound on a single user-work execution.
pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(30);
/// Default soft-stale boundary, relative to `created`.
pub const DEFAULT_UPDATE_AFTER: Duration = Duration::from_secs(60);
/// Default hard-expiry boundary, relative to `created`.
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(120);
/// Default bound on waiting inside `await_updated`; this is the method
/// timeout plus a small slack, so a waiter rarely times out strictly before
/// the worker it is waiting on would.
pub const DEFAULT_UPDATE_LOCK_SLACK: Duration = Duration::from_secs(5);

/// Builds a [`CacheConfiguration`].
///
/// A mutable accumulator that validates and freezes into an immutable
/// configuration on [`build`](Self::build).
pub struct CacheConfigurationBuilder<Args, K, V> {
	method_timeout: Duration,
	update_after: Duration,
	expire_after: Duration,
	update_lock_timeout: Option<Duration>,
	storage: Option<Arc<dyn Storage<K, V>>>,
	key_extractor: Option<Arc<dyn KeyExtractor<Args, Key = K>>>,
	eviction_strategy: Option<Arc<dyn EvictionStrategy<K>>>,
	entry_builder: Option<Arc<dyn EntryBuilder<V>>>,
	post_processing: Option<Arc<dyn PostProcessor<V>>>,
}
impl<Args, K, V> CacheConfigurationBuilder<Args, K, V>
where
	Args: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
	K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Start a builder populated with spec-documented defaults.
	pub fn new() -> Self {
		Self {
			method_timeout: DEFAULT_METHOD_TIMEOUT,
			update_after: DEFAULT_UPDATE_AFTER,
			expire_after: DEFAULT_EXPIRE_AFTER,
			update_lock_timeout: None,
			storage: None,
			key_extractor: None,
			eviction_strategy: None,
			entry_builder: None,
			post_processing: None,
		}
	}

	/// Max wall time of one user-work execution.
	pub fn method_timeout(mut self, timeout: Duration) -> Self {
		self.method_timeout = timeout;
		self
	}

	/// Duration from `created` to the soft-stale boundary.
	pub fn update_after(mut self, duration: Duration) -> Self {
		self.update_after = duration;
		self
	}

	/// Duration from `created` to hard expiry.
	pub fn expire_after(mut self, duration: Duration) -> Self {
		self.expire_after = duration;
		self
	}

	/// Max wait inside `await_updated`; defaults to `method_timeout` plus
	/// [`DEFAULT_UPDATE_LOCK_SLACK`] when left unset.
	pub fn update_lock_timeout(mut self, timeout: Duration) -> Self {
		self.update_lock_timeout = Some(timeout);
		self
	}

	/// Backend instance.
	pub fn storage(mut self, storage: Arc<dyn Storage<K, V>>) -> Self {
		self.storage = Some(storage);
		self
	}

	/// Argument-to-key function.
	pub fn key_extractor(mut self, extractor: Arc<dyn KeyExtractor<Args, Key = K>>) -> Self {
		self.key_extractor = Some(extractor);
		self
	}

	/// Victim-nomination policy.
	pub fn eviction_strategy(mut self, strategy: Arc<dyn EvictionStrategy<K>>) -> Self {
		self.eviction_strategy = Some(strategy);
		self
	}

	/// Timestamp stamper.
	pub fn entry_builder(mut self, builder: Arc<dyn EntryBuilder<V>>) -> Self {
		self.entry_builder = Some(builder);
		self
	}

	/// Value transform applied on return.
	pub fn post_processing(mut self, post_processing: Arc<dyn PostProcessor<V>>) -> Self {
		self.post_processing = Some(post_processing);
		self
	}

	/// Validate invariants and freeze into a [`CacheConfiguration`].
	///
	/// # Errors
	/// Returns [`Error::Validation`] if `expire_after < update_after`, or if
	/// no [`KeyExtractor`] was supplied — call [`key_extractor`](Self::key_extractor)
	/// explicitly, or start the builder via
	/// [`with_default_key_extractor`](CacheConfigurationBuilder::with_default_key_extractor)
	/// for the common case of a [`CompositeKey<Args>`](crate::key::CompositeKey).
	pub fn build(self) -> Result<CacheConfiguration<Args, K, V>> {
		if self.expire_after < self.update_after {
			return Err(Error::Validation {
				field: "expire_after",
				reason: "must be greater than or equal to update_after".into(),
			});
		}

		let key_extractor = self.key_extractor.ok_or(Error::Validation {
			field: "key_extractor",
			reason: "must be set; use `.key_extractor(...)` or, for the default composite key, \
			         `CacheConfigurationBuilder::with_default_key_extractor()`"
				.into(),
		})?;
		let update_lock_timeout =
			self.update_lock_timeout.unwrap_or(self.method_timeout + DEFAULT_UPDATE_LOCK_SLACK);
		let entry_builder = self
			.entry_builder
			.unwrap_or_else(|| Arc::new(DurationEntryBuilder::new(self.update_after, self.expire_after)));

		Ok(CacheConfiguration {
			method_timeout: self.method_timeout,
			update_lock_timeout,
			storage: self.storage.unwrap_or_else(|| Arc::new(InMemoryStorage::new())),
			key_extractor,
			eviction_strategy: self.eviction_strategy.unwrap_or_else(|| Arc::new(NoopEvictionStrategy)),
			entry_builder,
			post_processing: self.post_processing.unwrap_or_else(|| Arc::new(Identity)),
		})
	}
}
impl<Args, K, V> Default for CacheConfigurationBuilder<Args, K, V>
where
	Args: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
	K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<Args, V> CacheConfigurationBuilder<Args, crate::key::CompositeKey<Args>, V>
where
	Args: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Start a builder pre-populated with [`DefaultKeyExtractor`] — the
	/// common case where `Args` itself (qualified by callable identity) is
	/// already a suitable key.
	pub fn with_default_key_extractor() -> Self {
		Self::new().key_extractor(Arc::new(DefaultKeyExtractor))
	}
}

/// Frozen, immutable cache configuration.
///
/// A [`Memoized`](crate::wrapper::Memoized) facade holds this behind an
/// `Arc` and clones it into a [`ConfigSnapshot`] once per call, so a later
/// mutation of the builder — or a brand new configuration swapped in by the
/// user — never affects a call already in flight.
pub struct CacheConfiguration<Args, K, V> {
	pub(crate) method_timeout: Duration,
	pub(crate) update_lock_timeout: Duration,
	pub(crate) storage: Arc<dyn Storage<K, V>>,
	pub(crate) key_extractor: Arc<dyn KeyExtractor<Args, Key = K>>,
	pub(crate) eviction_strategy: Arc<dyn EvictionStrategy<K>>,
	pub(crate) entry_builder: Arc<dyn EntryBuilder<V>>,
	pub(crate) post_processing: Arc<dyn PostProcessor<V>>,
}
impl<Args, K, V> CacheConfiguration<Args, K, V> {
	/// Start a [`CacheConfigurationBuilder`].
	pub fn builder() -> CacheConfigurationBuilder<Args, K, V>
	where
		Args: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
		K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
		V: Clone + Send + Sync + 'static,
	{
		CacheConfigurationBuilder::new()
	}

	/// Freeze a [`ConfigSnapshot`] for one call. Collaborators are `Arc`
	/// clones, so the snapshot is cheap and independent of later swaps.
	pub(crate) fn snapshot(&self) -> ConfigSnapshot<Args, K, V> {
		ConfigSnapshot {
			method_timeout: self.method_timeout,
			update_lock_timeout: self.update_lock_timeout,
			storage: self.storage.clone(),
			key_extractor: self.key_extractor.clone(),
			eviction_strategy: self.eviction_strategy.clone(),
			entry_builder: self.entry_builder.clone(),
			post_processing: self.post_processing.clone(),
		}
	}
}

/// Immutable, per-call snapshot of a [`CacheConfiguration`].
///
/// Resolved once at the top of [`Memoized::call`](crate::wrapper::Memoized::call);
/// the coordinator and facade thread this through instead of re-reading the
/// live configuration, so collaborators swapped in mid-flight never affect a
/// call already under way.
#[derive(Clone)]
pub struct ConfigSnapshot<Args, K, V> {
	pub(crate) method_timeout: Duration,
	pub(crate) update_lock_timeout: Duration,
	pub(crate) storage: Arc<dyn Storage<K, V>>,
	pub(crate) key_extractor: Arc<dyn KeyExtractor<Args, Key = K>>,
	pub(crate) eviction_strategy: Arc<dyn EvictionStrategy<K>>,
	pub(crate) entry_builder: Arc<dyn EntryBuilder<V>>,
	pub(crate) post_processing: Arc<dyn PostProcessor<V>>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_expire_after_shorter_than_update_after() {
		let result = CacheConfiguration::<u32, u32, String>::builder()
			.update_after(Duration::from_secs(20))
			.expire_after(Duration::from_secs(10))
			.build();

		assert!(matches!(result, Err(Error::Validation { field: "expire_after", .. })));
	}

	#[test]
	fn defaults_update_lock_timeout_to_method_timeout_plus_slack() {
		let config = CacheConfigurationBuilder::<u32, crate::key::CompositeKey<u32>, String>
			::with_default_key_extractor()
			.method_timeout(Duration::from_secs(10))
			.build()
			.unwrap();

		assert_eq!(config.update_lock_timeout, Duration::from_secs(15));
	}

	#[test]
	fn rejects_build_with_no_key_extractor_configured() {
		let result = CacheConfiguration::<u32, u32, String>::builder().build();

		assert!(matches!(result, Err(Error::Validation { field: "key_extractor", .. })));
	}
}
