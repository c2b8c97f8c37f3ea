//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the memoization engine.
///
/// Per the error handling design, user work failures, timeouts, and
/// concurrent-refresh failures are all surfaced as a single
/// [`Error::CachedMethodFailed`] variant with the underlying cause attached
/// as a nested source rather than re-raised as its native type.
#[allow(missing_docs)]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	/// The cache configuration snapshot was not ready when the call was made.
	#[error("memoized call invoked before configuration was ready")]
	NotConfigured,

	/// User work raised, timed out, could not be started, or a concurrent
	/// refresh this call was waiting on failed to complete.
	#[error("cached method failed: {reason}")]
	CachedMethodFailed {
		/// Human-readable description of which failure path was taken.
		reason: CachedMethodFailureReason,
		/// Underlying cause, when one is available (never the caller's native
		/// error type — always boxed behind this crate's error boundary).
		#[source]
		cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
	},

	/// A storage backend `offer` failed; this aborts the in-flight refresh
	/// (reads failures degrade to "missing" instead, see the propagation
	/// policy, and never reach this variant).
	#[error("cache storage error: {0}")]
	Storage(String),

	/// Entry serialization or deserialization failed inside a `SerDe`.
	#[error("serde error: {0}")]
	Serde(String),

	/// A configuration value violated an invariant (e.g. `expire_after` less
	/// than `update_after`).
	#[error("invalid configuration for {field}: {reason}")]
	Validation { field: &'static str, reason: String },

	#[cfg(feature = "metrics")]
	#[error("metrics error: {0}")]
	Metrics(String),
}
impl Error {
	/// Wrap an arbitrary work-producing error as a [`Error::CachedMethodFailed`].
	pub(crate) fn work_failed<E>(reason: CachedMethodFailureReason, cause: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		Self::CachedMethodFailed { reason, cause: Some(Arc::new(cause)) }
	}

	/// Construct a [`Error::CachedMethodFailed`] with no underlying cause
	/// (used for "refresh failed to start" and the unfinished-refresh safety
	/// net, which are raised before any user error exists).
	pub(crate) fn work_failed_without_cause(reason: CachedMethodFailureReason) -> Self {
		Self::CachedMethodFailed { reason, cause: None }
	}
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}

/// Which branch of the refresh coordinator produced a [`Error::CachedMethodFailed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachedMethodFailureReason {
	/// Synchronous instantiation of the work future raised before any
	/// registry row was claimed.
	RefreshFailedToStart,
	/// The user work future ran past `method_timeout`.
	RefreshTimedOut,
	/// The user work future resolved to an error.
	RefreshFailedToComplete,
	/// A caller with no usable entry waited on a concurrent refresh that
	/// itself failed.
	ConcurrentRefreshFailed,
	/// A caller's wait on `await_updated` exceeded `update_lock_timeout`.
	UpdateLockTimedOut,
	/// The refresh exited (e.g. the driving task was dropped or panicked)
	/// without resolving the latch; the safety net resolved it on the
	/// caller's behalf.
	UnfinishedRefresh,
}
impl std::fmt::Display for CachedMethodFailureReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let text = match self {
			Self::RefreshFailedToStart => "refresh failed to start",
			Self::RefreshTimedOut => "refresh timed out",
			Self::RefreshFailedToComplete => "refresh failed to complete",
			Self::ConcurrentRefreshFailed => "concurrent refresh failed to complete",
			Self::UpdateLockTimedOut => "update lock timed out",
			Self::UnfinishedRefresh => "unfinished refresh",
		};

		f.write_str(text)
	}
}
