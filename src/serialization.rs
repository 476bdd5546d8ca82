//! Entry serialization.
//!
//! Entries are written inside a small versioned envelope:
//!
//! ```text
//! [MAGIC: 4 bytes] [VERSION: 4 bytes LE] [EXPIRES_AT: 8 bytes LE] [CODEC PAYLOAD]
//! ```
//!
//! `EXPIRES_AT` is milliseconds since the Unix epoch, `0` meaning no expiry.
//! Keeping it in the header lets liveness be checked without knowing the
//! value type. The payload format is pluggable through [`EntryCodec`];
//! [`PostcardCodec`] is the default.
//!
//! Bytes without the magic header were written by some other writer (or by
//! the backend itself, e.g. atomic counters) and are decoded as a bare value
//! with no expiry.

use crate::entry::Entry;
use crate::error::{Error, Result};
use serde::de::value::StrDeserializer;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::Serialize;

/// Envelope marker.
pub const CACHE_MAGIC: &[u8; 4] = b"RCSE";

/// Current envelope schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const VERSIONED_LEN: usize = 8;
const HEADER_LEN: usize = 16;

/// Injectable serialize/deserialize pair used for entry payloads.
pub trait EntryCodec: Send + Sync + 'static {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Compact binary payloads via `postcard`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl EntryCodec for PostcardCodec {
    fn name(&self) -> &'static str {
        "postcard"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        postcard::to_allocvec(value).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Human-readable JSON payloads, handy when other tools inspect the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EntryCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

/// Wrap an entry in the versioned envelope.
pub fn serialize_entry<C, V>(codec: &C, entry: &Entry<&V>) -> Result<Vec<u8>>
where
    C: EntryCodec,
    V: Serialize,
{
    let payload = codec.encode(entry.value)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(CACHE_MAGIC);
    bytes.extend_from_slice(&CURRENT_SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&entry.expires_at.unwrap_or(0).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode stored bytes into an entry.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: magic present but the header is truncated
/// - `Error::VersionMismatch`: envelope written by another schema version
/// - `Error::DeserializationError`: payload does not decode as `V`
pub fn deserialize_entry<C, V>(codec: &C, bytes: &[u8]) -> Result<Entry<V>>
where
    C: EntryCodec,
    V: DeserializeOwned,
{
    match read_expiry(bytes)? {
        None => decode_legacy(codec, bytes).map(Entry::new),
        Some(expires_at) => Ok(Entry {
            value: codec.decode(&bytes[HEADER_LEN..])?,
            expires_at,
        }),
    }
}

/// Expiry carried by stored bytes, without decoding the value.
///
/// Returns `None` for bytes without an envelope (they never expire on their
/// own), `Some(expires_at)` for enveloped entries.
pub fn read_expiry(bytes: &[u8]) -> Result<Option<Option<u64>>> {
    if !bytes.starts_with(CACHE_MAGIC) {
        return Ok(None);
    }

    if bytes.len() < VERSIONED_LEN {
        return Err(Error::InvalidCacheEntry(format!(
            "truncated envelope header ({} bytes)",
            bytes.len()
        )));
    }

    let found = u32::from_le_bytes(le_array(&bytes[4..VERSIONED_LEN]));
    if found != CURRENT_SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found,
        });
    }

    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidCacheEntry(format!(
            "truncated envelope header ({} bytes)",
            bytes.len()
        )));
    }

    let expires_at = u64::from_le_bytes(le_array(&bytes[VERSIONED_LEN..HEADER_LEN]));
    Ok(Some((expires_at != 0).then_some(expires_at)))
}

fn le_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Decode a value written without an envelope.
///
/// UTF-8 text is tried as JSON first (numbers written by atomic counters,
/// JSON documents from other writers), then as a plain string. Anything else
/// goes through the codec as a bare value.
fn decode_legacy<C, V>(codec: &C, bytes: &[u8]) -> Result<V>
where
    C: EntryCodec,
    V: DeserializeOwned,
{
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Ok(value) = serde_json::from_str::<V>(text) {
            return Ok(value);
        }
        let de: StrDeserializer<'_, serde::de::value::Error> = text.into_deserializer();
        if let Ok(value) = V::deserialize(de) {
            return Ok(value);
        }
    }
    codec.decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_envelope_round_trip_struct() {
        let profile = Profile {
            id: 7,
            name: "ada".into(),
            tags: vec!["admin".into()],
        };
        let bytes = serialize_entry(&PostcardCodec, &Entry::new(&profile)).expect("serialize");
        assert!(bytes.starts_with(CACHE_MAGIC));

        let entry: Entry<Profile> = deserialize_entry(&PostcardCodec, &bytes).expect("deserialize");
        assert_eq!(entry.value, profile);
        assert_eq!(entry.expires_at, None);
    }

    #[test]
    fn test_envelope_keeps_expiry() {
        let entry = Entry {
            value: &"bar".to_string(),
            expires_at: Some(42),
        };
        let bytes = serialize_entry(&JsonCodec, &entry).expect("serialize");
        let decoded: Entry<String> = deserialize_entry(&JsonCodec, &bytes).expect("deserialize");
        assert_eq!(decoded.expires_at, Some(42));
        assert!(decoded.is_expired_at(42));
    }

    #[test]
    fn test_legacy_counter_bytes() {
        let as_int: Entry<i64> = deserialize_entry(&PostcardCodec, b"-2").expect("int");
        assert_eq!(as_int.value, -2);
        assert_eq!(as_int.expires_at, None);

        let as_text: Entry<String> = deserialize_entry(&PostcardCodec, b"1").expect("text");
        assert_eq!(as_text.value, "1");
    }

    #[test]
    fn test_legacy_plain_text() {
        let entry: Entry<String> =
            deserialize_entry(&PostcardCodec, b"written elsewhere").expect("text");
        assert_eq!(entry.value, "written elsewhere");
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut bytes = CACHE_MAGIC.to_vec();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(b"payload");

        let result: Result<Entry<String>> = deserialize_entry(&PostcardCodec, &bytes);
        assert!(matches!(
            result,
            Err(Error::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn test_read_expiry_without_value_type() {
        let entry = Entry {
            value: &vec![1u8, 2, 3],
            expires_at: Some(99),
        };
        let bytes = serialize_entry(&PostcardCodec, &entry).expect("serialize");
        assert_eq!(read_expiry(&bytes).expect("expiry"), Some(Some(99)));

        let forever = serialize_entry(&PostcardCodec, &Entry::new(&1u8)).expect("serialize");
        assert_eq!(read_expiry(&forever).expect("expiry"), Some(None));
        assert_eq!(read_expiry(b"42").expect("legacy"), None);
    }

    #[test]
    fn test_truncated_header_is_invalid() {
        let result: Result<Entry<String>> = deserialize_entry(&PostcardCodec, b"RCSE\x01");
        assert!(matches!(result, Err(Error::InvalidCacheEntry(_))));

        let mut no_expiry = CACHE_MAGIC.to_vec();
        no_expiry.extend_from_slice(&CURRENT_SCHEMA_VERSION.to_le_bytes());
        let result: Result<Entry<String>> = deserialize_entry(&PostcardCodec, &no_expiry);
        assert!(matches!(result, Err(Error::InvalidCacheEntry(_))));
    }

    #[test]
    fn test_wrong_type_fails_to_decode() {
        let bytes =
            serialize_entry(&JsonCodec, &Entry::new(&"not a number")).expect("serialize");
        let result: Result<Entry<u32>> = deserialize_entry(&JsonCodec, &bytes);
        assert!(result.is_err());
    }
}
