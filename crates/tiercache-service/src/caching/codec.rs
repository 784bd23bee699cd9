use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::DecodeError;

/// Converts between the raw payload of an object and its in-memory representation.
pub trait Codec: fmt::Debug + Send + Sync + 'static {
    /// The decoded object. It is cloned for every caller, so this should be cheap to clone.
    type Item: Clone + Send + Sync + 'static;

    /// Decodes a payload, either freshly fetched or read back from storage.
    fn decode(&self, data: &[u8]) -> Result<Self::Item, DecodeError>;

    /// Encodes the object for persistence.
    ///
    /// Returning `None` skips the storage tier for this object.
    fn encode(&self, item: &Self::Item) -> Option<Vec<u8>>;

    /// The approximate in-memory size of the object, used to bound the memory tier.
    fn weight(&self, item: &Self::Item) -> u32;
}

fn saturating_weight(len: usize) -> u32 {
    len.try_into().unwrap_or(u32::MAX)
}

/// A codec that keeps the payload as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Bytes;

    fn decode(&self, data: &[u8]) -> Result<Self::Item, DecodeError> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn encode(&self, item: &Self::Item) -> Option<Vec<u8>> {
        Some(item.to_vec())
    }

    fn weight(&self, item: &Self::Item) -> u32 {
        saturating_weight(item.len())
    }
}

/// A codec for JSON documents that deserialize into `T`.
///
/// Decoded documents are shared behind an [`Arc`]. Their weight is the length of their
/// serialized form.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = Arc<T>;

    fn decode(&self, data: &[u8]) -> Result<Self::Item, DecodeError> {
        serde_json::from_slice(data)
            .map(Arc::new)
            .map_err(DecodeError::malformed)
    }

    fn encode(&self, item: &Self::Item) -> Option<Vec<u8>> {
        match serde_json::to_vec(item.as_ref()) {
            Ok(data) => Some(data),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode object, not persisting it");
                None
            }
        }
    }

    fn weight(&self, item: &Self::Item) -> u32 {
        serde_json::to_vec(item.as_ref())
            .map(|data| saturating_weight(data.len()))
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Thumbnail {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    }

    #[test]
    fn test_bytes_codec() {
        let codec = BytesCodec;
        let item = codec.decode(b"\x89PNG").unwrap();

        assert_eq!(&item[..], b"\x89PNG");
        assert_eq!(codec.encode(&item).unwrap(), b"\x89PNG");
        assert_eq!(codec.weight(&item), 4);
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Thumbnail>::new();
        let payload = br#"{"width":2,"height":1,"pixels":[0,255]}"#;

        let item = codec.decode(payload).unwrap();
        assert_eq!(
            *item,
            Thumbnail {
                width: 2,
                height: 1,
                pixels: vec![0, 255],
            }
        );

        let encoded = codec.encode(&item).unwrap();
        assert_eq!(*codec.decode(&encoded).unwrap(), *item);
        assert_eq!(codec.weight(&item), payload.len() as u32);
    }

    #[test]
    fn test_json_codec_malformed() {
        let codec = JsonCodec::<Thumbnail>::new();

        let err = codec.decode(b"garbage").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
