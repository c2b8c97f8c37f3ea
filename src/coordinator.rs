//! Refresh Coordinator (C8): the core state machine reconciling concurrent
//! callers against the single-flight registry, storage, and eviction.

// std
use std::{future::Future, hash::Hash, pin::Pin};
// self
use crate::{
	_prelude::*,
	config::ConfigSnapshot,
	entry::CacheEntry,
	error::CachedMethodFailureReason,
	tracker::{ClaimOutcome, Latch, Tracker},
};

/// Boxed, already-spawned-ready future producing a raw value from user work.
pub(crate) type WorkFuture<V> = Pin<Box<dyn Future<Output = Result<V>> + Send>>;

/// Factory invoked synchronously to instantiate the pending work. Kept
/// separate from the future itself so that a synchronous construction
/// failure ("Refresh failed to start") is distinguishable from a failure of
/// the work itself.
pub(crate) trait WorkFactory<V>: Send {
	fn instantiate(self: Box<Self>) -> Result<WorkFuture<V>>;
}
impl<F, V> WorkFactory<V> for F
where
	F: FnOnce() -> Result<WorkFuture<V>> + Send,
{
	fn instantiate(self: Box<Self>) -> Result<WorkFuture<V>> {
		(*self)()
	}
}

/// Drive one call through the refresh coordinator's state machine.
///
/// `current_entry` is the entry already observed by the caller, if any.
/// Returns the entry the caller should derive its return value from.
#[tracing::instrument(skip_all)]
pub(crate) async fn coordinate_refresh<Args, K, V>(
	tracker: &Tracker<K, V>,
	key: &K,
	current_entry: Option<Arc<CacheEntry<V>>>,
	work_factory: impl WorkFactory<V> + 'static,
	cfg: &ConfigSnapshot<Args, K, V>,
	on_single_flight_attach: impl FnOnce(),
) -> Result<Arc<CacheEntry<V>>>
where
	K: Clone + Eq + Hash + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	// `claim_or_attach` performs the TOCTOU-safe "is it already being
	// updated, and if not, claim it" check under a single lock — this is the
	// rendezvous branch and the start of the claiming path at once.
	let latch = match tracker.claim_or_attach(key.clone()).await {
		ClaimOutcome::Attached(_receiver) => {
			tracing::debug!("attaching to in-flight refresh");
			on_single_flight_attach();

			return match current_entry {
				// Caller has nothing to serve: must wait for the in-flight
				// refresh.
				None => tracker.await_updated(key, cfg.update_lock_timeout).await.map_err(|err| {
					tracing::debug!(error = %err, "concurrent refresh failed while caller had nothing to serve");
					err
				}),
				// Caller already holds a soft-stale value: return it
				// immediately and let the in-flight refresh continue
				// unobserved.
				Some(entry) => Ok(entry),
			};
		},
		ClaimOutcome::Claimed(latch) => latch,
	};

	// Instantiate the pending work now that the claim is held. A synchronous
	// construction failure never claims the registry row without cleanup.
	let work = match Box::new(work_factory).instantiate() {
		Ok(work) => work,
		Err(cause) => {
			let err = Error::work_failed(CachedMethodFailureReason::RefreshFailedToStart, cause);

			latch.resolve_err(Arc::new(err.clone()));

			return Err(err);
		},
	};

	run_claimed_refresh(tracker, latch, work, cfg).await
}

/// Run the work under `method_timeout` on a detached task (so cancellation
/// of the awaiting caller never cancels the refresh other callers may be
/// depending on), then resolve the latch and drive storage + eviction.
async fn run_claimed_refresh<Args, K, V>(
	tracker: &Tracker<K, V>,
	latch: Latch<K, V>,
	work: WorkFuture<V>,
	cfg: &ConfigSnapshot<Args, K, V>,
) -> Result<Arc<CacheEntry<V>>>
where
	K: Clone + Eq + Hash + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	let key = latch.key().clone();
	let method_timeout = cfg.method_timeout;
	let task = tokio::spawn(async move { tokio::time::timeout(method_timeout, work).await });

	let outcome = task.await;
	let now = Utc::now();

	match outcome {
		// Join error: the spawned task panicked. Treated like any other
		// unfinished refresh; the safety net (latch's `Drop`) would also
		// catch this, but resolving explicitly here keeps the failure
		// reason precise instead of falling through to "unfinished refresh".
		Err(join_err) => {
			let err = Error::work_failed(CachedMethodFailureReason::RefreshFailedToComplete, join_err);

			latch.resolve_err(Arc::new(err.clone()));

			Err(err)
		},
		// Timeout: `update_lock_timeout` and `method_timeout` race
		// independently; the worker may still be running even though we
		// resolve the latch with a timeout here.
		Ok(Err(_elapsed)) => {
			tracing::warn!(?key, "refresh timed out");

			let err = Error::work_failed_without_cause(CachedMethodFailureReason::RefreshTimedOut);

			latch.resolve_err(Arc::new(err.clone()));

			Err(err)
		},
		Ok(Ok(Err(cause))) => {
			tracing::warn!(?key, error = %cause, "refresh failed");

			let err = Error::work_failed(CachedMethodFailureReason::RefreshFailedToComplete, cause);

			latch.resolve_err(Arc::new(err.clone()));

			Err(err)
		},
		Ok(Ok(Ok(value))) => {
			let entry = Arc::new(cfg.entry_builder.build(now, value));

			if let Err(storage_err) = cfg.storage.offer(key.clone(), entry.clone()).await {
				tracing::error!(?key, error = %storage_err, "storage offer failed; aborting refresh");

				let err =
					Error::work_failed(CachedMethodFailureReason::RefreshFailedToComplete, storage_err);

				latch.resolve_err(Arc::new(err.clone()));

				return Err(err);
			}

			latch.resolve_ok(entry.clone());
			tracker.forget_if_resolved(&key).await;

			cfg.eviction_strategy.mark_written(&key);
			schedule_eviction_release(cfg, &key);

			Ok(entry)
		},
	}
}

/// Best-effort, fire-and-forget release of whatever key the eviction
/// strategy nominates after a successful write. Failures are logged and
/// never surfaced.
fn schedule_eviction_release<Args, K, V>(cfg: &ConfigSnapshot<Args, K, V>, written_key: &K)
where
	K: Clone + Eq + Hash + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	let Some(victim) = cfg.eviction_strategy.next_to_release() else { return };

	if &victim == written_key {
		// Nominating the key we just wrote would immediately undo the write;
		// the coordinator trusts the strategy not to do this, but guards
		// against it defensively since the release runs detached.
		return;
	}

	let storage = cfg.storage.clone();
	let eviction_strategy = cfg.eviction_strategy.clone();

	tokio::spawn(async move {
		match storage.release(&victim).await {
			Ok(()) => eviction_strategy.mark_released(&victim),
			Err(err) => tracing::warn!(error = %err, "background eviction release failed"),
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{config::CacheConfigurationBuilder, key::KeyExtractor, storage::InMemoryStorage};

	/// Identity [`KeyExtractor`] used only to keep these unit tests focused
	/// on the coordinator rather than key derivation; the facade always
	/// uses a real extractor.
	#[derive(Clone, Copy)]
	struct IdentityKeyExtractor;
	impl KeyExtractor<&'static str> for IdentityKeyExtractor {
		type Key = &'static str;

		fn format_key(&self, _callable_id: &str, args: &&'static str) -> Self::Key {
			args
		}
	}

	fn test_snapshot()
	-> (ConfigSnapshot<&'static str, &'static str, &'static str>, Arc<InMemoryStorage<&'static str, &'static str>>)
	{
		let storage = Arc::new(InMemoryStorage::new());
		let config = CacheConfigurationBuilder::<&'static str, &'static str, &'static str>::new()
			.key_extractor(Arc::new(IdentityKeyExtractor))
			.storage(storage.clone())
			.build()
			.unwrap();

		(config.snapshot(), storage)
	}

	// Minimal smoke test exercising the success path end to end; the full
	// freshness-driven scenarios (S1-S7) live in tests/scenarios.rs where the
	// facade is available to drive them through `Memoized::call`.
	#[tokio::test]
	async fn successful_refresh_stores_entry_and_resolves_latch() {
		let tracker: Tracker<&str, &str> = Tracker::new();
		let (snapshot, storage) = test_snapshot();
		let factory = || -> Result<WorkFuture<&str>> { Ok(Box::pin(async { Ok("value") })) };

		let entry = coordinate_refresh(&tracker, &"k", None, factory, &snapshot, || {}).await.unwrap();

		assert_eq!(entry.value(), &"value");
		assert!(!tracker.is_being_updated(&"k").await);

		let stored = storage.get(&"k").await.unwrap().expect("entry stored");

		assert_eq!(stored.value(), &"value");
	}

	#[tokio::test]
	async fn failed_refresh_never_writes_storage() {
		let tracker: Tracker<&str, &str> = Tracker::new();
		let (snapshot, storage) = test_snapshot();
		let factory = || -> Result<WorkFuture<&str>> {
			Ok(Box::pin(async { Err(Error::Storage("boom".into())) }))
		};

		let result = coordinate_refresh(&tracker, &"k", None, factory, &snapshot, || {}).await;

		assert!(matches!(
			result,
			Err(Error::CachedMethodFailed {
				reason: CachedMethodFailureReason::RefreshFailedToComplete,
				..
			})
		));
		assert!(storage.get(&"k").await.unwrap().is_none());
		assert!(!tracker.is_being_updated(&"k").await);
	}
}
