//! Optional `metrics` facade instrumentation for the wrapper (C9).
//!
//! Counters are labeled by `callable` (the memoized callable's identity)
//! rather than by cache key: cache keys are caller-controlled and may carry
//! unbounded cardinality, whereas the number of distinct memoized callables
//! in a process is small and fixed at startup.

// std
use std::sync::{
	OnceLock,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")] use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "freshcache_requests_total";
const METRIC_HITS_TOTAL: &str = "freshcache_hits_total";
const METRIC_STALE_TOTAL: &str = "freshcache_stale_total";
const METRIC_MISSES_TOTAL: &str = "freshcache_misses_total";
const METRIC_REFRESH_TOTAL: &str = "freshcache_refresh_total";
const METRIC_REFRESH_DURATION: &str = "freshcache_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "freshcache_refresh_errors_total";
const METRIC_SINGLE_FLIGHT_ATTACH: &str = "freshcache_single_flight_attach_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe metrics accumulator for a single memoized callable.
#[derive(Debug, Default)]
pub struct CallableMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	stale_serves: AtomicU64,
	single_flight_attaches: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl CallableMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a hit outcome, tagging whether it was served soft-stale.
	pub fn record_hit(&self, stale: bool) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
		if stale {
			self.stale_serves.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record a miss outcome (missing, hard-expired, or forced entry).
	pub fn record_miss(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record that a caller attached to an in-flight refresh instead of
	/// starting its own.
	pub fn record_single_flight_attach(&self) {
		self.single_flight_attaches.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a refresh failure (timeout, user error, or failed start).
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CallableMetricsSnapshot {
		CallableMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			single_flight_attaches: self.single_flight_attaches.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-callable telemetry counters.
#[derive(Clone, Debug)]
pub struct CallableMetricsSnapshot {
	/// Total number of calls observed.
	pub total_requests: u64,
	/// Count of calls served from the cache (fresh or soft-stale).
	pub cache_hits: u64,
	/// Count of calls served a soft-stale entry.
	pub stale_serves: u64,
	/// Count of calls that attached to an already in-flight refresh.
	pub single_flight_attaches: u64,
	/// Count of successful refresh operations.
	pub refresh_successes: u64,
	/// Count of refresh attempts that resulted in a surfaced failure.
	pub refresh_errors: u64,
	/// Microsecond latency of the most recent refresh.
	pub last_refresh_micros: Option<u64>,
}
impl CallableMetricsSnapshot {
	/// Convenience method to compute the cache hit rate.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.cache_hits as f64 / self.total_requests as f64
		}
	}

	/// Ratio of soft-stale serves over total requests.
	pub fn stale_ratio(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.stale_serves as f64 / self.total_requests as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the
/// recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a cache hit, tagging whether it was served soft-stale.
pub(crate) fn record_hit(callable: &str, stale: bool) {
	let labels = base_labels(callable);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

	if stale {
		metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
	}
}

/// Record a cache miss that required a blocking refresh.
pub(crate) fn record_miss(callable: &str) {
	let labels = base_labels(callable);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
}

/// Record that a caller attached to an already in-flight refresh.
pub(crate) fn record_single_flight_attach(callable: &str) {
	metrics::counter!(METRIC_SINGLE_FLIGHT_ATTACH, base_labels(callable).iter()).increment(1);
}

/// Record a successful refresh attempt along with its latency.
pub(crate) fn record_refresh_success(callable: &str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(callable, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, base_labels(callable).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed refresh attempt.
pub(crate) fn record_refresh_error(callable: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(callable, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(callable).iter()).increment(1);
}

fn base_labels(callable: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("callable", callable.to_owned()));

	labels
}

fn status_labels(callable: &str, status: &'static str) -> LabelSet {
	let mut labels = base_labels(callable);

	labels.push(Label::new("status", status));

	labels
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter
			.snapshot()
			.into_vec()
			.into_iter()
			.map(|(key, _, _, value)| (key, value))
			.collect()
	}

	fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str, labels: &[(&str, &str)]) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels
				.into_iter()
				.zip(expected_sorted.into_iter())
				.all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_hits_misses_and_stale_counts() {
		let snapshot = capture_metrics(|| {
			record_hit("get_user", false);
			record_hit("get_user", true);
			record_miss("get_user");
		});
		let base = [("callable", "get_user")];

		assert_eq!(counter_value(&snapshot, "freshcache_requests_total", &base), 3);
		assert_eq!(counter_value(&snapshot, "freshcache_hits_total", &base), 2);
		assert_eq!(counter_value(&snapshot, "freshcache_misses_total", &base), 1);
		assert_eq!(counter_value(&snapshot, "freshcache_stale_total", &base), 1);
	}

	#[test]
	fn records_refresh_success_and_errors() {
		let snapshot = capture_metrics(|| {
			record_refresh_success("get_user", std::time::Duration::from_millis(20));
			record_refresh_error("get_user");
			record_single_flight_attach("get_user");
		});
		let base = [("callable", "get_user")];
		let success = [("callable", "get_user"), ("status", "success")];
		let error = [("callable", "get_user"), ("status", "error")];

		assert_eq!(counter_value(&snapshot, "freshcache_refresh_total", &success), 1);
		assert_eq!(counter_value(&snapshot, "freshcache_refresh_total", &error), 1);
		assert_eq!(counter_value(&snapshot, "freshcache_refresh_errors_total", &base), 1);
		assert_eq!(counter_value(&snapshot, "freshcache_single_flight_attach_total", &base), 1);
	}

	#[test]
	fn callable_metrics_accumulator_tracks_hit_rate() {
		let metrics = CallableMetrics::new();

		metrics.record_hit(false);
		metrics.record_hit(true);
		metrics.record_miss();
		metrics.record_refresh_success(Duration::from_millis(5));

		let snapshot = metrics.snapshot();

		assert_eq!(snapshot.total_requests, 3);
		assert_eq!(snapshot.cache_hits, 2);
		assert_eq!(snapshot.stale_serves, 1);
		assert!((snapshot.hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
		assert!((snapshot.stale_ratio() - (1.0 / 3.0)).abs() < 1e-9);
		assert_eq!(snapshot.last_refresh_micros, Some(5_000));
	}
}
