//! Invalidation Handle (C10): an external trigger that removes entries for
//! specific argument tuples.

// std
use std::hash::Hash;
// self
use crate::{_prelude::*, key::KeyExtractor, storage::Storage};

/// Bound external handle that can evict a memoized callable's entries by
/// argument value, without holding a reference back to the
/// [`Memoized`](crate::wrapper::Memoized) facade that produced it.
///
/// Constructed via [`Memoized::invalidation_handle`](crate::wrapper::Memoized::invalidation_handle),
/// which follows a two-phase init: the three collaborators it needs
/// (storage, key extractor, callable identity) are supplied as independent
/// `Arc` values rather than a back-reference to the facade, so the handle
/// can outlive — or be held independently of — the facade it was derived
/// from.
pub struct InvalidationHandle<Args, K, V> {
	callable_id: Arc<str>,
	storage: Arc<dyn Storage<K, V>>,
	key_extractor: Arc<dyn KeyExtractor<Args, Key = K>>,
}
impl<Args, K, V> InvalidationHandle<Args, K, V>
where
	K: Clone + Eq + Hash + Send + Sync,
{
	pub(crate) fn bound(
		callable_id: Arc<str>,
		storage: Arc<dyn Storage<K, V>>,
		key_extractor: Arc<dyn KeyExtractor<Args, Key = K>>,
	) -> Self {
		Self { callable_id, storage, key_extractor }
	}

	/// Remove the entry for `args`, if any.
	///
	/// Derives the same key a call to the bound callable with these
	/// arguments would use, then releases it from storage. If a refresh is
	/// currently in flight for that key, this does not cancel it — the
	/// refresh's own successful completion will simply re-populate the
	/// entry.
	pub async fn invalidate(&self, args: &Args) -> Result<()> {
		let key = self.key_extractor.format_key(&self.callable_id, args);

		self.storage.release(&key).await
	}
}
