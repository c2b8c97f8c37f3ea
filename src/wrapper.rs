//! Wrapper Facade (C9): binds a user callable and a configuration into a
//! memoized callable, and the reserved `force_refresh` call option.

// std
use std::{future::Future, hash::Hash};
// crates.io
use tokio::sync::RwLock as AsyncRwLock;
// self
use crate::{
	_prelude::*,
	config::{CacheConfiguration, ConfigSnapshot},
	coordinator::{WorkFactory, WorkFuture, coordinate_refresh},
	entry::{CacheEntry, Freshness},
	error::Error,
	invalidation::InvalidationHandle,
	tracker::Tracker,
};
#[cfg(feature = "metrics")] use crate::metrics;

/// Explicit per-call options.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallOptions {
	/// Always take the blocking refresh branch, passing any existing entry
	/// through as a rendezvous fallback if the refresh fails.
	pub force_refresh: bool,
}
impl CallOptions {
	/// Convenience constructor for a forced refresh.
	pub fn force_refresh() -> Self {
		Self { force_refresh: true }
	}
}

/// A user async callable bound to a [`CacheConfiguration`]; the entry point
/// of the memoization engine.
///
/// `Args` is the argument value the callable is keyed by; `V` is the
/// produced value. The facade is cheap to clone (`Arc` internals) so it can
/// be shared freely across tasks.
pub struct Memoized<Args, K, V, F> {
	callable_id: Arc<str>,
	work: Arc<F>,
	config: AsyncRwLock<Option<Arc<CacheConfiguration<Args, K, V>>>>,
	tracker: Arc<Tracker<K, V>>,
	#[cfg(feature = "metrics")]
	metrics: Arc<crate::metrics::CallableMetrics>,
}
impl<Args, K, V, F, Fut> Memoized<Args, K, V, F>
where
	Args: Clone + Send + Sync + 'static,
	K: Clone + Eq + Hash + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	F: Fn(Args) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<V>> + Send + 'static,
{
	/// Bind `work` to `config` under `callable_id`, ready to serve calls
	/// immediately.
	pub fn new(callable_id: impl Into<Arc<str>>, work: F, config: CacheConfiguration<Args, K, V>) -> Self {
		Self::from_parts(callable_id.into(), work, Some(Arc::new(config)))
	}

	/// Bind `work` without a configuration yet; calls fail with
	/// [`Error::NotConfigured`] until [`Memoized::reconfigure`] is called.
	pub fn unconfigured(callable_id: impl Into<Arc<str>>, work: F) -> Self {
		Self::from_parts(callable_id.into(), work, None)
	}

	fn from_parts(
		callable_id: Arc<str>,
		work: F,
		config: Option<Arc<CacheConfiguration<Args, K, V>>>,
	) -> Self {
		Self {
			callable_id,
			work: Arc::new(work),
			config: AsyncRwLock::new(config),
			tracker: Arc::new(Tracker::new()),
			#[cfg(feature = "metrics")]
			metrics: crate::metrics::CallableMetrics::new(),
		}
	}

	/// Swap in a new configuration. Calls already in flight keep the
	/// snapshot they froze at the top of `call`; only calls starting after
	/// this returns observe the new configuration.
	pub async fn reconfigure(&self, config: CacheConfiguration<Args, K, V>) {
		*self.config.write().await = Some(Arc::new(config));
	}

	/// The identity this callable's keys are qualified by.
	pub fn callable_id(&self) -> &str {
		&self.callable_id
	}

	/// Per-callable metrics accumulator, when the `metrics` feature is on.
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> Arc<crate::metrics::CallableMetrics> {
		self.metrics.clone()
	}

	/// Invoke the memoized callable with the default [`CallOptions`].
	pub async fn call(&self, args: Args) -> Result<V> {
		self.call_with_options(args, CallOptions::default()).await
	}

	/// Invoke the memoized callable, forcing a blocking refresh regardless
	/// of the observed freshness tier.
	pub async fn force_refresh(&self, args: Args) -> Result<V> {
		self.call_with_options(args, CallOptions::force_refresh()).await
	}

	/// Invoke the memoized callable with explicit [`CallOptions`].
	#[tracing::instrument(skip(self, args), fields(callable = %self.callable_id, force_refresh = options.force_refresh))]
	pub async fn call_with_options(&self, args: Args, options: CallOptions) -> Result<V> {
		// Step 1-2: a ready configuration snapshot, frozen for this call.
		let config = self.config.read().await.clone().ok_or(Error::NotConfigured)?;
		let snapshot = config.snapshot();

		// Step 4: derive the key; `force_refresh` never reaches the key
		// extractor or the user callable (it is an explicit `CallOptions`
		// field, never folded into `args`).
		let key = snapshot.key_extractor.format_key(&self.callable_id, &args);

		// Step 5: look up the current entry and notify eviction on a hit.
		let current_entry = match snapshot.storage.get(&key).await {
			Ok(entry) => entry,
			Err(err) => {
				tracing::warn!(callable = %self.callable_id, error = %err, "storage read failed; treating as missing");
				None
			},
		};

		if current_entry.is_some() {
			snapshot.eviction_strategy.mark_read(&key);
		}

		// Step 6: one logical "now" for this call's freshness decision.
		let now = Utc::now();
		let freshness =
			current_entry.as_ref().map(|entry| entry.classify(now)).unwrap_or(Freshness::Missing);

		tracing::debug!(callable = %self.callable_id, ?freshness, force_refresh = options.force_refresh, "call dispatched");

		let resolved = if options.force_refresh {
			self.record_miss();
			self.blocking_refresh(&key, current_entry.clone(), args, &snapshot).await?
		} else {
			match freshness {
				Freshness::Missing | Freshness::HardExpired => {
					self.record_miss();
					self.blocking_refresh(&key, None, args, &snapshot).await?
				},
				Freshness::SoftStale => {
					let entry = current_entry.expect("soft-stale implies an entry was observed");

					self.record_hit(true);
					self.spawn_background_refresh(key, entry.clone(), args, &snapshot);

					entry
				},
				Freshness::Fresh => {
					self.record_hit(false);

					current_entry.expect("fresh implies an entry was observed")
				},
			}
		};

		// Step 9: post-processing is pure and applied uniformly, whether the
		// entry came from a hit, a background-scheduled soft-stale read, or a
		// fresh blocking refresh.
		Ok(snapshot.post_processing.apply(resolved.value().clone()))
	}

	/// Bind a fresh [`InvalidationHandle`] to this callable's current
	/// storage, key extractor, and identity, via a two-phase init that
	/// avoids a back-reference to this facade.
	pub async fn invalidation_handle(&self) -> Result<InvalidationHandle<Args, K, V>> {
		let config = self.config.read().await.clone().ok_or(Error::NotConfigured)?;
		let snapshot = config.snapshot();

		Ok(InvalidationHandle::bound(
			self.callable_id.clone(),
			snapshot.storage,
			snapshot.key_extractor,
		))
	}

	async fn blocking_refresh(
		&self,
		key: &K,
		current_entry: Option<Arc<CacheEntry<V>>>,
		args: Args,
		snapshot: &ConfigSnapshot<Args, K, V>,
	) -> Result<Arc<CacheEntry<V>>> {
		let started = std::time::Instant::now();
		let factory = self.work_factory(args);
		let result = coordinate_refresh(&self.tracker, key, current_entry, factory, snapshot, || {
			self.record_single_flight_attach();
		})
		.await;

		match &result {
			Ok(_) => self.record_refresh_success(started.elapsed()),
			Err(_) => self.record_refresh_error(),
		}

		result
	}

	/// Soft-stale path: schedule the refresh on the ambient executor without
	/// awaiting it, so the triggering caller returns the pre-refresh value
	/// immediately. If the runtime is torn down before the task runs, the
	/// task is simply dropped — accepted rather than worked around, since
	/// nothing has committed to the caller.
	fn spawn_background_refresh(
		&self,
		key: K,
		current_entry: Arc<CacheEntry<V>>,
		args: Args,
		snapshot: &ConfigSnapshot<Args, K, V>,
	) {
		let tracker = self.tracker.clone();
		let snapshot = snapshot.clone();
		let factory = self.work_factory(args);
		#[cfg(feature = "metrics")] let metrics = self.metrics.clone();
		let callable_id = self.callable_id.clone();

		tokio::spawn(async move {
			let started = std::time::Instant::now();
			let result = coordinate_refresh(&tracker, &key, Some(current_entry), factory, &snapshot, || {
				#[cfg(feature = "metrics")]
				{
					metrics.record_single_flight_attach();
					metrics::record_single_flight_attach(&callable_id);
				}
			})
			.await;

			match result {
				Ok(_) => {
					#[cfg(feature = "metrics")]
					{
						metrics.record_refresh_success(started.elapsed());
						metrics::record_refresh_success(&callable_id, started.elapsed());
					}
				},
				Err(err) => {
					// Background refreshes never propagate to the triggering
					// caller; only logged here.
					tracing::warn!(callable = %callable_id, error = %err, "background refresh failed");

					#[cfg(feature = "metrics")]
					{
						metrics.record_refresh_error();
						metrics::record_refresh_error(&callable_id);
					}
				},
			}
		});
	}

	/// Build the work factory: instantiation (calling the user closure to
	/// produce its future) is deferred until the coordinator actually
	/// invokes it, past the single-flight claim step (see
	/// `coordinator::coordinate_refresh`).
	fn work_factory(&self, args: Args) -> impl WorkFactory<V> + 'static {
		let work = self.work.clone();

		move || -> Result<WorkFuture<V>> { Ok(Box::pin(work(args))) }
	}

	fn record_hit(&self, stale: bool) {
		#[cfg(feature = "metrics")]
		{
			self.metrics.record_hit(stale);
			metrics::record_hit(&self.callable_id, stale);
		}
		#[cfg(not(feature = "metrics"))]
		let _ = stale;
	}

	fn record_miss(&self) {
		#[cfg(feature = "metrics")]
		{
			self.metrics.record_miss();
			metrics::record_miss(&self.callable_id);
		}
	}

	fn record_refresh_success(&self, duration: Duration) {
		#[cfg(feature = "metrics")]
		{
			self.metrics.record_refresh_success(duration);
			metrics::record_refresh_success(&self.callable_id, duration);
		}
		#[cfg(not(feature = "metrics"))]
		let _ = duration;
	}

	fn record_refresh_error(&self) {
		#[cfg(feature = "metrics")]
		{
			self.metrics.record_refresh_error();
			metrics::record_refresh_error(&self.callable_id);
		}
	}

	fn record_single_flight_attach(&self) {
		#[cfg(feature = "metrics")]
		{
			self.metrics.record_single_flight_attach();
			metrics::record_single_flight_attach(&self.callable_id);
		}
	}
}
