//! The value codec: a self-describing archive format for whatever a
//! caller stores under a key.
//!
//! `Value` is a tagged sum of the primitive and collection shapes the
//! store promises to round-trip — primitives, byte strings, ordered
//! sequences, unordered sets, and string-keyed mappings — encoded with
//! `rkyv` so that a decode is a zero-copy cast plus a cheap owned
//! materialization, not a parse.

use rkyv::{
    archived_root,
    ser::{serializers::AllocSerializer, Serializer},
    Archive, Deserialize, Serialize,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[archive_attr(derive(Debug))]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Seq(Vec<Value>),
    /// Unordered in meaning; insertion order is preserved on the wire
    /// because that's what `Vec` gives us for free.
    Set(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut serializer = AllocSerializer::<1024>::default();
        serializer
            .serialize_value(self)
            .map_err(|e| Error::Decode(format!("{e:?}")))?;
        let bytes = serializer.into_serializer().into_inner();
        Ok(bytes.to_vec())
    }

    /// Decodes a value previously produced by `encode`.
    ///
    /// Trusts `bytes` to be a well-formed archive written by this
    /// crate's own `encode` — the store never hands it untrusted bytes.
    /// `archived_root` performs no validation of its input.
    pub fn decode(bytes: &[u8]) -> Result<Value> {
        let archived = unsafe { archived_root::<Value>(bytes) };
        let value: Value = archived
            .deserialize(&mut rkyv::Infallible)
            .expect("deserializing an archived Value is infallible");
        Ok(value)
    }
}

macro_rules! impl_from_for_value {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(bool, Bool);
impl_from_for_value!(i64, Int);
impl_from_for_value!(f64, Float);
impl_from_for_value!(Vec<u8>, Bytes);
impl_from_for_value!(String, Str);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl TryFrom<Value> for String {
    type Error = Error;
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(Error::Decode(format!("expected Str, got {other:?}"))),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Int(n) => Ok(n),
            other => Err(Error::Decode(format!("expected Int, got {other:?}"))),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(Error::Decode(format!("expected Bytes, got {other:?}"))),
        }
    }
}
