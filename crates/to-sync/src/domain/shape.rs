//! Result-shape gate.
//!
//! The bridge decodes the callback body into whatever result type the
//! caller declares. Only JSON-document carriers make sense there: maps,
//! sequences, fixed-size sequences, and structs (optionally behind an
//! owned pointer, which serde makes transparent). Scalars and untyped
//! dynamic values are rejected *before* any side effect, so a miswired
//! call never registers a waiter or submits a job.
//!
//! There is no reflection to ask a type its kind, but serde answers the
//! same question: drive `T::deserialize` with a probe `Deserializer`
//! whose every entry point records which shape the type asked for, and
//! classify from the first request.

use std::fmt;

use serde::de::{self, DeserializeOwned, Visitor};

use crate::domain::error::ToSyncError;

/// Verify that `T` can carry a decoded JSON document.
pub(crate) fn check_result_shape<T: DeserializeOwned>() -> Result<(), ToSyncError> {
    match T::deserialize(ShapeProbe) {
        // The probe always errors; a hypothetical input-free type needs
        // nothing from the document and passes by vacuity.
        Ok(_) => Ok(()),
        Err(Probe::Shape {
            supported: true, ..
        }) => Ok(()),
        Err(Probe::Shape {
            name,
            supported: false,
        }) => Err(ToSyncError::UnsupportedShape(name.to_string())),
        // A hand-written impl bailed out before requesting a shape;
        // nothing proves it is a container.
        Err(Probe::Message(_)) => Err(ToSyncError::UnsupportedShape("opaque".to_string())),
    }
}

/// The classification, smuggled out of serde as the error type.
#[derive(Debug)]
enum Probe {
    Shape { name: &'static str, supported: bool },
    Message(String),
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Shape { name, supported } => {
                write!(f, "shape probe: {name} (supported: {supported})")
            }
            Probe::Message(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Probe {}

impl de::Error for Probe {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Probe::Message(msg.to_string())
    }
}

struct ShapeProbe;

macro_rules! probe_shape {
    ($($method:ident => ($name:literal, $supported:literal)),* $(,)?) => {
        $(fn $method<V>(self, _visitor: V) -> Result<V::Value, Self::Error>
        where
            V: Visitor<'de>,
        {
            Err(Probe::Shape { name: $name, supported: $supported })
        })*
    };
}

impl<'de> de::Deserializer<'de> for ShapeProbe {
    type Error = Probe;

    probe_shape! {
        // Containers: a JSON document fits.
        deserialize_seq => ("seq", true),
        deserialize_map => ("map", true),
        // Scalars and friends: no document to decode into.
        deserialize_any => ("any", false),
        deserialize_bool => ("bool", false),
        deserialize_i8 => ("i8", false),
        deserialize_i16 => ("i16", false),
        deserialize_i32 => ("i32", false),
        deserialize_i64 => ("i64", false),
        deserialize_u8 => ("u8", false),
        deserialize_u16 => ("u16", false),
        deserialize_u32 => ("u32", false),
        deserialize_u64 => ("u64", false),
        deserialize_f32 => ("f32", false),
        deserialize_f64 => ("f64", false),
        deserialize_char => ("char", false),
        deserialize_str => ("string", false),
        deserialize_string => ("string", false),
        deserialize_bytes => ("bytes", false),
        deserialize_byte_buf => ("bytes", false),
        deserialize_option => ("option", false),
        deserialize_unit => ("unit", false),
        deserialize_identifier => ("identifier", false),
        deserialize_ignored_any => ("any", false),
    }

    fn deserialize_unit_struct<V>(
        self,
        _name: &'static str,
        _visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Err(Probe::Shape {
            name: "unit struct",
            supported: false,
        })
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        // Transparent wrapper: classify the inner type instead.
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_tuple<V>(self, _len: usize, _visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Err(Probe::Shape {
            name: "tuple",
            supported: true,
        })
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Err(Probe::Shape {
            name: "tuple struct",
            supported: true,
        })
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Err(Probe::Shape {
            name: "struct",
            supported: true,
        })
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Err(Probe::Shape {
            name: "enum",
            supported: false,
        })
    }
}
