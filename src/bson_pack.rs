//! The serialization-pack contract (C1): an abstract document/value/reader/writer capability set
//! that the rest of the core is built against, plus the concrete BSON implementation this crate
//! ships with and uses in production.
//!
//! Per spec §4.1/§9, the core never assumes BSON directly in its *contract* — a test pack may
//! emit JSON instead, and the round-trip invariant (`reader(writer(v)) == v`) must hold for any
//! conforming implementation. In practice, the command and aggregation layers (C4/C5) are written
//! directly against the concrete [`Document`]/[`Value`] aliases below (the teacher driver does the
//! same: it commits to `bson::Document` for its production path rather than threading a generic
//! pack parameter through every command). [`SerializationPack`] exists so that contract can be
//! verified independently, and so a test harness can swap in [`JsonPack`] without touching the
//! command layer's logic.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// The concrete document type used throughout the rest of this crate.
pub type Document = bson::Document;

/// The concrete scalar/array/document value type used throughout the rest of this crate.
pub type Value = bson::Bson;

/// A (name, value) pair used to build documents, per spec §3 "Element producer".
pub type Element = (String, Value);

/// The abstract capability set an implementer must provide, per spec §4.1.
///
/// All methods are total: no constructor here can fail. The `Writer`/`Reader` hooks are
/// `write`/`read` on [`PackWriter`]/[`PackReader`] below, separated out so they can be generic
/// over `T` without poisoning the pack trait itself with an extra type parameter.
pub trait SerializationPack {
    /// The atom produced by this pack: a document, array, string, int32, int64, double, boolean,
    /// or other scalar.
    type Value: Clone + std::fmt::Debug;

    /// Builds an ordered document from element producers.
    fn make_document(elements: Vec<(String, Self::Value)>) -> Self::Value;

    /// Builds a non-empty array.
    fn make_array(head: Self::Value, tail: Vec<Self::Value>) -> Self::Value;

    /// Builds a (name, value) element producer.
    fn element_producer(name: impl Into<String>, value: Self::Value) -> (String, Self::Value) {
        (name.into(), value)
    }

    fn bool(v: bool) -> Self::Value;
    fn int32(v: i32) -> Self::Value;
    fn int64(v: i64) -> Self::Value;
    fn double(v: f64) -> Self::Value;
    fn string(v: impl Into<String>) -> Self::Value;
}

/// An opaque `(T -> Value)` hook, per spec §4.1.
pub trait PackWriter<P: SerializationPack, T> {
    fn write(value: &T) -> P::Value;
}

/// An opaque `(Value -> T-or-failure)` hook, per spec §4.1.
pub trait PackReader<P: SerializationPack, T> {
    fn read(value: &P::Value) -> Result<T>;
}

/// The production pack: BSON, via the `bson` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct BsonPack;

impl SerializationPack for BsonPack {
    type Value = bson::Bson;

    fn make_document(elements: Vec<(String, Self::Value)>) -> Self::Value {
        bson::Bson::Document(elements.into_iter().collect())
    }

    fn make_array(head: Self::Value, mut tail: Vec<Self::Value>) -> Self::Value {
        let mut arr = Vec::with_capacity(tail.len() + 1);
        arr.push(head);
        arr.append(&mut tail);
        bson::Bson::Array(arr)
    }

    fn bool(v: bool) -> Self::Value {
        bson::Bson::Boolean(v)
    }

    fn int32(v: i32) -> Self::Value {
        bson::Bson::Int32(v)
    }

    fn int64(v: i64) -> Self::Value {
        bson::Bson::Int64(v)
    }

    fn double(v: f64) -> Self::Value {
        bson::Bson::Double(v)
    }

    fn string(v: impl Into<String>) -> Self::Value {
        bson::Bson::String(v.into())
    }
}

/// A serde-driven writer/reader for any `T: Serialize + DeserializeOwned` over [`BsonPack`],
/// mirroring the teacher's use of `bson::to_bson`/`bson::from_bson` at the command layer.
pub struct Serde;

impl<T: Serialize> PackWriter<BsonPack, T> for Serde {
    fn write(value: &T) -> bson::Bson {
        bson::to_bson(value).unwrap_or(bson::Bson::Null)
    }
}

impl<T: DeserializeOwned> PackReader<BsonPack, T> for Serde {
    fn read(value: &bson::Bson) -> Result<T> {
        bson::from_bson(value.clone()).map_err(|e| {
            crate::error::Error::internal(format!("failed to decode value: {e}"))
        })
    }
}

/// A test-only pack that emits `serde_json::Value`, used to validate that the core's contract
/// doesn't secretly assume BSON (spec §4.1, §9 "Dynamic polymorphism over the serialization
/// pack").
#[cfg(test)]
pub struct JsonPack;

#[cfg(test)]
impl SerializationPack for JsonPack {
    type Value = serde_json::Value;

    fn make_document(elements: Vec<(String, Self::Value)>) -> Self::Value {
        serde_json::Value::Object(elements.into_iter().collect())
    }

    fn make_array(head: Self::Value, mut tail: Vec<Self::Value>) -> Self::Value {
        let mut arr = vec![head];
        arr.append(&mut tail);
        serde_json::Value::Array(arr)
    }

    fn bool(v: bool) -> Self::Value {
        serde_json::Value::Bool(v)
    }

    fn int32(v: i32) -> Self::Value {
        serde_json::Value::from(v)
    }

    fn int64(v: i64) -> Self::Value {
        serde_json::Value::from(v)
    }

    fn double(v: f64) -> Self::Value {
        serde_json::Value::from(v)
    }

    fn string(v: impl Into<String>) -> Self::Value {
        serde_json::Value::String(v.into())
    }
}
