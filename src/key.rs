//! Argument-to-key derivation (C2 in the component table).

// std
use std::hash::Hash;
// self
use crate::_prelude::*;

/// Pure function from `(callable identity, args)` to a stable, hashable
/// cache key.
///
/// Implementations must not fold the reserved `force_refresh` call option
/// into the key — it is stripped before this trait ever sees the call (see
/// [`CallOptions`](crate::wrapper::CallOptions)).
pub trait KeyExtractor<Args>: Send + Sync {
	/// The key type produced for this callable.
	type Key: Clone + Eq + Hash + Send + Sync;

	/// Derive a key from the callable's identity and its arguments.
	fn format_key(&self, callable_id: &str, args: &Args) -> Self::Key;
}

/// Composite key combining a callable identity with its argument value.
///
/// Using `callable_id` in the key lets a single [`Storage`](crate::storage::Storage)
/// backend be shared safely across multiple memoized callables without key
/// collisions between them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompositeKey<K> {
	callable_id: Arc<str>,
	args_key: K,
}
impl<K> CompositeKey<K> {
	/// Callable identity component of the key.
	pub fn callable_id(&self) -> &str {
		&self.callable_id
	}

	/// Argument-derived component of the key.
	pub fn args_key(&self) -> &K {
		&self.args_key
	}
}

/// Default [`KeyExtractor`]: uses `Args` itself (cloned) as the key,
/// qualified by callable identity.
///
/// This matches the common case where the memoized function's argument
/// tuple is already `Clone + Eq + Hash` and needs no further projection —
/// analogous to the original Python library hashing `(args, kwargs)` directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultKeyExtractor;
impl<Args> KeyExtractor<Args> for DefaultKeyExtractor
where
	Args: Clone + Eq + Hash + Send + Sync,
{
	type Key = CompositeKey<Args>;

	fn format_key(&self, callable_id: &str, args: &Args) -> Self::Key {
		CompositeKey { callable_id: Arc::from(callable_id), args_key: args.clone() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn distinguishes_same_args_across_callables() {
		let extractor = DefaultKeyExtractor;
		let a = extractor.format_key("fn_a", &42u32);
		let b = extractor.format_key("fn_b", &42u32);

		assert_ne!(a, b);
		assert_eq!(a.args_key(), &42);
	}

	#[test]
	fn same_callable_and_args_produce_equal_keys() {
		let extractor = DefaultKeyExtractor;
		let a = extractor.format_key("fn_a", &("x", 1));
		let b = extractor.format_key("fn_a", &("x", 1));

		assert_eq!(a, b);
	}
}
