//! Value <-> bytes codecs for entries (C6), composable the way the original
//! library composes a base64 wrapper around an inner binary codec.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use serde::{Serialize, de::DeserializeOwned};
// self
use crate::{_prelude::*, entry::CacheEntry, error::Error};

/// Value <-> bytes codec for a [`CacheEntry`].
///
/// Round-trips are expected to be lossless modulo any configured value
/// transformation. A [`Storage`](crate::storage::Storage)
/// implementation may use a `SerDe` internally; composition between codecs
/// (e.g. [`EncodingSerDe`] wrapping [`JsonSerDe`]) is transparent to the
/// coordinator.
pub trait SerDe<V>: Send + Sync {
	/// Encode an entry to bytes.
	fn serialize(&self, entry: &CacheEntry<V>) -> Result<Vec<u8>>;

	/// Decode an entry from bytes produced by [`SerDe::serialize`].
	fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry<V>>;
}

#[derive(Serialize, serde::Deserialize)]
struct JsonEnvelope<R> {
	created: f64,
	update_after: f64,
	expires_after: f64,
	value: R,
}

/// Human-readable JSON [`SerDe`].
///
/// When `V` is not itself `Serialize`/`DeserializeOwned`, supply a pair of
/// reversible transforms into a serializable representation `R` via
/// [`JsonSerDe::with_transform`] — mirroring the original library's
/// `value_to_reversible_repr`/`reversible_repr_to_value` hooks.
pub struct JsonSerDe<V, R = V> {
	to_repr: Arc<dyn Fn(&V) -> R + Send + Sync>,
	from_repr: Arc<dyn Fn(R) -> V + Send + Sync>,
}
impl<V> JsonSerDe<V, V>
where
	V: Clone + Send + Sync + 'static,
{
	/// Construct a codec for a value that is already serializable, using an
	/// identity transform.
	pub fn new() -> Self {
		Self { to_repr: Arc::new(|value: &V| value.clone()), from_repr: Arc::new(|repr: V| repr) }
	}
}
impl<V> Default for JsonSerDe<V, V>
where
	V: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<V, R> JsonSerDe<V, R> {
	/// Construct a codec through an explicit reversible representation `R`.
	pub fn with_transform(
		to_repr: impl Fn(&V) -> R + Send + Sync + 'static,
		from_repr: impl Fn(R) -> V + Send + Sync + 'static,
	) -> Self {
		Self { to_repr: Arc::new(to_repr), from_repr: Arc::new(from_repr) }
	}
}
impl<V, R> SerDe<V> for JsonSerDe<V, R>
where
	V: Send + Sync,
	R: Serialize + DeserializeOwned + Send + Sync,
{
	fn serialize(&self, entry: &CacheEntry<V>) -> Result<Vec<u8>> {
		let envelope = JsonEnvelope {
			created: datetime_to_timestamp(entry.created()),
			update_after: datetime_to_timestamp(entry.update_after()),
			expires_after: datetime_to_timestamp(entry.expires_after()),
			value: (self.to_repr)(entry.value()),
		};

		serde_json::to_vec(&envelope).map_err(|err| Error::Serde(err.to_string()))
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry<V>> {
		let envelope: JsonEnvelope<R> =
			serde_json::from_slice(bytes).map_err(|err| Error::Serde(err.to_string()))?;
		let created = timestamp_to_datetime(envelope.created)?;
		let update_after = timestamp_to_datetime(envelope.update_after)?;
		let expires_after = timestamp_to_datetime(envelope.expires_after)?;

		Ok(CacheEntry::new((self.from_repr)(envelope.value), created, update_after, expires_after))
	}
}

/// [`SerDe`] combinator that base64-encodes an inner codec's bytes.
///
/// Ported from the original library's `EncodingSerDe`, which wraps
/// `codecs.encode(inner.serialize(entry), 'base64')`.
pub struct EncodingSerDe<S> {
	inner: S,
}
impl<S> EncodingSerDe<S> {
	/// Wrap `inner` with base64 encoding.
	pub fn new(inner: S) -> Self {
		Self { inner }
	}
}
impl<V, S> SerDe<V> for EncodingSerDe<S>
where
	S: SerDe<V>,
{
	fn serialize(&self, entry: &CacheEntry<V>) -> Result<Vec<u8>> {
		let raw = self.inner.serialize(entry)?;

		Ok(BASE64_STANDARD.encode(raw).into_bytes())
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry<V>> {
		let decoded = BASE64_STANDARD
			.decode(bytes)
			.map_err(|err| Error::Serde(format!("invalid base64 payload: {err}")))?;

		self.inner.deserialize(&decoded)
	}
}

fn datetime_to_timestamp(instant: DateTime<Utc>) -> f64 {
	instant.timestamp_millis() as f64 / 1000.0
}

fn timestamp_to_datetime(seconds: f64) -> Result<DateTime<Utc>> {
	DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
		.ok_or_else(|| Error::Serde(format!("timestamp {seconds} out of range")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builder::{DurationEntryBuilder, EntryBuilder};

	#[test]
	fn json_round_trips_an_entry() {
		let builder = DurationEntryBuilder::new(Duration::from_secs(1), Duration::from_secs(2));
		let now = timestamp_to_datetime(1_000_000.0).unwrap();
		let entry = builder.build(now, "value".to_string());
		let serde = JsonSerDe::<String>::new();

		let bytes = serde.serialize(&entry).unwrap();
		let decoded = serde.deserialize(&bytes).unwrap();

		assert_eq!(decoded.value(), entry.value());
		assert_eq!(decoded.created(), entry.created());
		assert_eq!(decoded.update_after(), entry.update_after());
		assert_eq!(decoded.expires_after(), entry.expires_after());
	}

	#[test]
	fn encoding_serde_wraps_inner_bytes_in_base64() {
		let builder = DurationEntryBuilder::new(Duration::from_secs(1), Duration::from_secs(2));
		let now = timestamp_to_datetime(2_000_000.0).unwrap();
		let entry = builder.build(now, 7i64);
		let inner = JsonSerDe::<i64>::new();
		let wrapped = EncodingSerDe::new(inner);

		let encoded = wrapped.serialize(&entry).unwrap();

		assert!(BASE64_STANDARD.decode(&encoded).is_ok());

		let decoded = wrapped.deserialize(&encoded).unwrap();

		assert_eq!(decoded.value(), entry.value());
	}

	#[test]
	fn with_transform_round_trips_through_a_reversible_representation() {
		let builder = DurationEntryBuilder::new(Duration::from_secs(1), Duration::from_secs(2));
		let now = timestamp_to_datetime(3_000_000.0).unwrap();
		let entry = builder.build(now, vec![1u8, 2, 3]);
		let serde = JsonSerDe::with_transform(
			|value: &Vec<u8>| value.iter().map(|b| *b as u32).collect::<Vec<u32>>(),
			|repr: Vec<u32>| repr.into_iter().map(|v| v as u8).collect::<Vec<u8>>(),
		);

		let bytes = serde.serialize(&entry).unwrap();
		let decoded = serde.deserialize(&bytes).unwrap();

		assert_eq!(decoded.value(), entry.value());
	}
}
