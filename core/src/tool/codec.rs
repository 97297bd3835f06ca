//! Typed JSON codec contract: the sole decode/encode surface for
//! tool payloads and results. No ad-hoc `serde_json::from_value` calls outside
//! a codec impl.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Error returned by a codec. Upstream (the run loop / executors) translates
/// this into `RetryHint { reason: invalid_arguments }` — codecs never coerce
/// silently, they fail loudly on mismatch.
#[derive(Debug, Clone, thiserror::Error)]
#[error("codec error for {type_name}: {message}")]
pub struct CodecError {
    pub type_name: &'static str,
    pub message: String,
}

/// Bidirectional JSON codec for one Rust type `T`.
///
/// `to_json`/`from_json` MUST NOT coerce on mismatch; a malformed payload is a
/// hard error, not a best-effort parse.
pub trait CodecJson<T>: Send + Sync {
    fn to_json(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn from_json(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Default codec for any `T: Serialize + DeserializeOwned`, backed by serde_json.
pub struct SerdeJsonCodec<T> {
    type_name: &'static str,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> SerdeJsonCodec<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> CodecJson<T> for SerdeJsonCodec<T> {
    fn to_json(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError {
            type_name: self.type_name,
            message: e.to_string(),
        })
    }

    fn from_json(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError {
            type_name: self.type_name,
            message: e.to_string(),
        })
    }
}

/// Type-erased view onto a [`CodecJson<T>`] for use at the tool boundary,
/// where the run loop only ever holds a `serde_json::Value` and the concrete
/// `T` is known solely at registration time by the executor that was built
/// with it.
///
/// `validate` round-trips the value through the concrete type: decode, then
/// re-encode. A decode failure means the value never matched what the tool
/// advertised; the re-encoded form is the canonical one the rest of the run
/// loop sees.
pub trait ErasedResultCodec: Send + Sync {
    fn validate(&self, value: &Value) -> Result<Value, CodecError>;
}

impl<T: Serialize + DeserializeOwned + Send + Sync> ErasedResultCodec for SerdeJsonCodec<T> {
    fn validate(&self, value: &Value) -> Result<Value, CodecError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CodecError {
            type_name: self.type_name,
            message: e.to_string(),
        })?;
        let decoded: T = self.from_json(&bytes)?;
        let out_bytes = self.to_json(&decoded)?;
        serde_json::from_slice(&out_bytes).map_err(|e| CodecError {
            type_name: self.type_name,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Query {
        text: String,
    }

    #[test]
    fn round_trips_valid_value() {
        let codec = SerdeJsonCodec::<Query>::new("Query");
        let q = Query {
            text: "docs".into(),
        };
        let bytes = codec.to_json(&q).unwrap();
        let back = codec.from_json(&bytes).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn rejects_malformed_payload_with_structured_error() {
        let codec = SerdeJsonCodec::<Query>::new("Query");
        let err = codec.from_json(b"{not valid json").unwrap_err();
        assert_eq!(err.type_name, "Query");
    }

    #[test]
    fn erased_validate_round_trips_a_matching_value() {
        let codec: &dyn ErasedResultCodec = &SerdeJsonCodec::<Query>::new("Query");
        let value = serde_json::json!({"text": "docs"});
        let canonical = codec.validate(&value).unwrap();
        assert_eq!(canonical, value);
    }

    #[test]
    fn erased_validate_rejects_a_value_missing_a_required_field() {
        let codec: &dyn ErasedResultCodec = &SerdeJsonCodec::<Query>::new("Query");
        let value = serde_json::json!({"wrong_field": "docs"});
        assert!(codec.validate(&value).is_err());
    }
}
