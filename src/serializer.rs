//! Pluggable value encoding (spec §6 "Consumed interfaces").

use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encodes/decodes an application value to/from a byte sequence.
///
/// The default implementation is JSON; applications may inject a
/// different `Serializer` (e.g. MessagePack) at construction time
/// without touching the rest of the library. Kept to these two
/// object-safe methods so the trait can be used as `Arc<dyn Serializer>`;
/// typed convenience helpers live on [`SerializerExt`] instead.
pub trait Serializer: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, Error>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, Error>;
}

/// Typed `encode`/`decode` built on top of the object-safe [`Serializer`]
/// methods. Blanket-implemented for every `Serializer`, including
/// `dyn Serializer`, since its methods are generic over `T` rather than
/// part of the trait's vtable.
pub trait SerializerExt: Serializer {
    fn encode_typed<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Error> {
        let v = serde_json::to_value(value)?;
        self.encode(&v)
    }

    fn decode_typed<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Error> {
        let v = self.decode(bytes)?;
        Ok(serde_json::from_value(v)?)
    }
}

impl<S: Serializer + ?Sized> SerializerExt for S {}

/// Default JSON serializer, matching every envelope in this codebase.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
