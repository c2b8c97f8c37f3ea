//! Update Status Tracker (C7): the per-key single-flight registry.

// std
use std::{collections::HashMap, hash::Hash};
// crates.io
use tokio::sync::{Mutex, watch};
// self
use crate::{
	_prelude::*,
	entry::CacheEntry,
	error::{CachedMethodFailureReason, Error},
};

/// Outcome delivered to waiters through a resolved latch.
pub(crate) type Outcome<V> = std::result::Result<Arc<CacheEntry<V>>, Arc<Error>>;

/// Per-key single-flight registry.
///
/// At most one unresolved latch exists per key at any time. The registry is
/// guarded by a single [`tokio::sync::Mutex`] so that the "check whether a
/// key is being updated, then claim it" sequence the coordinator performs is
/// atomic even on a multi-threaded runtime — closing the TOCTOU gap between
/// a naive separate `is_being_updated` check and `mark_being_updated` call.
#[derive(Debug)]
pub(crate) struct Tracker<K, V> {
	rows: Mutex<HashMap<K, watch::Receiver<Option<Outcome<V>>>>>,
}
impl<K, V> Tracker<K, V>
where
	K: Eq + Hash + Clone + Send + Sync,
	V: Send + Sync,
{
	pub(crate) fn new() -> Self {
		Self { rows: Mutex::new(HashMap::new()) }
	}

	/// Snapshot membership test.
	pub(crate) async fn is_being_updated(&self, key: &K) -> bool {
		let rows = self.rows.lock().await;

		row_is_live(rows.get(key))
	}

	/// Atomically check whether `key` is already being updated and, if not,
	/// claim it. Closes the TOCTOU gap between a separate `is_being_updated`
	/// and `mark_being_updated` call.
	pub(crate) async fn claim_or_attach(&self, key: K) -> ClaimOutcome<K, V> {
		let mut rows = self.rows.lock().await;

		if let Some(existing) = rows.get(&key) {
			if row_is_live(Some(existing)) {
				return ClaimOutcome::Attached(existing.clone());
			}
		}

		let (sender, receiver) = watch::channel(None);

		rows.insert(key.clone(), receiver);

		ClaimOutcome::Claimed(Latch { key, sender: Some(sender), resolved: false })
	}

	/// Suspend until the latch for `key` resolves, or fail after
	/// `update_lock_timeout` — independent of whether the refresh worker
	/// itself is still running.
	pub(crate) async fn await_updated(
		&self,
		key: &K,
		update_lock_timeout: Duration,
	) -> Result<Arc<CacheEntry<V>>> {
		let mut receiver = {
			let rows = self.rows.lock().await;

			match rows.get(key) {
				Some(receiver) => receiver.clone(),
				None =>
					return Err(Error::work_failed_without_cause(
						CachedMethodFailureReason::ConcurrentRefreshFailed,
					)),
			}
		};

		let wait = async {
			loop {
				if let Some(outcome) = receiver.borrow().clone() {
					return outcome;
				}

				if receiver.changed().await.is_err() {
					return Err(Arc::new(Error::work_failed_without_cause(
						CachedMethodFailureReason::UnfinishedRefresh,
					)));
				}
			}
		};

		match tokio::time::timeout(update_lock_timeout, wait).await {
			Ok(Ok(entry)) => Ok(entry),
			Ok(Err(cause)) => Err(Error::CachedMethodFailed {
				reason: CachedMethodFailureReason::ConcurrentRefreshFailed,
				cause: Some(Arc::new(ArcCause(cause))),
			}),
			Err(_elapsed) =>
				Err(Error::work_failed_without_cause(CachedMethodFailureReason::UpdateLockTimedOut)),
		}
	}

	/// Drop a resolved row eagerly (used by the coordinator after it has
	/// observed a latch resolve on the claiming path, so the next caller
	/// does not pay for a lazy eviction on its own critical path).
	pub(crate) async fn forget_if_resolved(&self, key: &K) {
		let mut rows = self.rows.lock().await;

		if let Some(existing) = rows.get(key)
			&& !row_is_live(Some(existing))
		{
			rows.remove(key);
		}
	}
}

/// Error newtype letting an `Arc<Error>` satisfy `std::error::Error` as a
/// nested `source` without double-wrapping the outer `Error` type.
#[derive(Debug)]
struct ArcCause(Arc<Error>);
impl std::fmt::Display for ArcCause {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Display::fmt(&self.0, f)
	}
}
impl std::error::Error for ArcCause {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		self.0.source()
	}
}

/// Result of [`Tracker::claim_or_attach`].
pub(crate) enum ClaimOutcome<K, V> {
	/// A refresh was already in flight; attach to its receiver.
	Attached(watch::Receiver<Option<Outcome<V>>>),
	/// No refresh was in flight; the caller now owns the latch and must
	/// resolve it exactly once.
	Claimed(Latch<K, V>),
}

/// One-shot latch owned by the caller that started a refresh.
///
/// Dropping an unresolved `Latch` (a panic inside the refresh task, or an
/// early return the coordinator did not anticipate) synchronously resolves
/// it with [`CachedMethodFailureReason::UnfinishedRefresh`] via `Drop`, so no
/// waiter is ever left hanging; no async work is needed in `Drop` because
/// [`watch::Sender::send`] does not require an executor.
pub(crate) struct Latch<K, V> {
	key: K,
	sender: Option<watch::Sender<Option<Outcome<V>>>>,
	resolved: bool,
}
impl<K, V> Latch<K, V> {
	pub(crate) fn key(&self) -> &K {
		&self.key
	}

	/// Resolve the latch with a successful outcome.
	pub(crate) fn resolve_ok(mut self, entry: Arc<CacheEntry<V>>) {
		self.resolved = true;
		if let Some(sender) = self.sender.take() {
			let _ = sender.send(Some(Ok(entry)));
		}
	}

	/// Resolve the latch with a failure outcome.
	pub(crate) fn resolve_err(mut self, cause: Arc<Error>) {
		self.resolved = true;
		if let Some(sender) = self.sender.take() {
			let _ = sender.send(Some(Err(cause)));
		}
	}
}
impl<K, V> Drop for Latch<K, V> {
	fn drop(&mut self) {
		if !self.resolved
			&& let Some(sender) = self.sender.take()
		{
			let _ = sender.send(Some(Err(Arc::new(Error::work_failed_without_cause(
				CachedMethodFailureReason::UnfinishedRefresh,
			)))));
		}
	}
}

fn row_is_live<V>(row: Option<&watch::Receiver<Option<Outcome<V>>>>) -> bool {
	match row {
		None => false,
		Some(receiver) => receiver.borrow().is_none(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn claim_then_attach_then_resolve() {
		let tracker: Tracker<&str, &str> = Tracker::new();

		assert!(!tracker.is_being_updated(&"k").await);

		let latch = match tracker.claim_or_attach("k").await {
			ClaimOutcome::Claimed(latch) => latch,
			ClaimOutcome::Attached(_) => panic!("expected to claim an empty key"),
		};

		assert!(tracker.is_being_updated(&"k").await);

		let mut receiver = match tracker.claim_or_attach("k").await {
			ClaimOutcome::Attached(receiver) => receiver,
			ClaimOutcome::Claimed(_) => panic!("expected to attach to the in-flight refresh"),
		};

		let builder_now = Utc::now();
		let entry = Arc::new(CacheEntry::new(
			"value",
			builder_now,
			builder_now + TimeDelta::seconds(1),
			builder_now + TimeDelta::seconds(2),
		));

		latch.resolve_ok(entry.clone());

		receiver.changed().await.unwrap();
		assert_eq!(receiver.borrow().clone().unwrap().unwrap().value(), entry.value());

		tracker.forget_if_resolved(&"k").await;
		assert!(!tracker.is_being_updated(&"k").await);
	}

	#[tokio::test]
	async fn dropping_an_unresolved_latch_fails_waiters() {
		let tracker: Tracker<&str, &str> = Tracker::new();
		let latch = match tracker.claim_or_attach("k").await {
			ClaimOutcome::Claimed(latch) => latch,
			ClaimOutcome::Attached(_) => unreachable!(),
		};

		drop(latch);

		let result = tracker.await_updated(&"k", Duration::from_secs(1)).await;

		assert!(result.is_err());
	}

	#[tokio::test]
	async fn await_updated_times_out_independently_of_the_refresh() {
		let tracker: Tracker<&str, &str> = Tracker::new();
		let _latch = match tracker.claim_or_attach("k").await {
			ClaimOutcome::Claimed(latch) => latch,
			ClaimOutcome::Attached(_) => unreachable!(),
		};

		let result = tracker.await_updated(&"k", Duration::from_millis(10)).await;

		assert!(matches!(
			result,
			Err(Error::CachedMethodFailed {
				reason: CachedMethodFailureReason::UpdateLockTimedOut,
				..
			})
		));
	}
}
