//! JSON payload validation.
//!
//! Payloads cross a process boundary when an event is queued, so every payload
//! must survive `T -> JSON -> T`. Validation happens once, when the event is
//! built, never when it is replayed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, CoreResult};

/// Reject empty (or whitespace-only) event names.
pub fn validate_event_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::EmptyEventName);
    }
    Ok(())
}

/// Serialize `payload` into a JSON value, checking that it reads back as `T`.
///
/// Non-finite floats are rejected wherever they sit in the payload: JSON would
/// write them as `null`, which an `Option<f64>` reads back as `None`. The
/// read-back then catches the remaining shapes serde can write but not read.
pub fn to_payload<T>(event: &str, payload: &T) -> CoreResult<JsonValue>
where
    T: Serialize + DeserializeOwned,
{
    payload
        .serialize(finite::FiniteFloats)
        .map_err(|e| CoreError::invalid_payload(event, e.to_string()))?;

    let value = serde_json::to_value(payload)
        .map_err(|e| CoreError::invalid_payload(event, e.to_string()))?;

    serde_json::from_value::<T>(value.clone()).map_err(|e| {
        CoreError::invalid_payload(event, format!("payload does not round-trip: {e}"))
    })?;

    Ok(value)
}

/// Render a payload as the text stored in a queue record.
pub fn encode_payload(event: &str, payload: &JsonValue) -> CoreResult<String> {
    serde_json::to_string(payload).map_err(|e| CoreError::invalid_payload(event, e.to_string()))
}

/// Parse stored payload text back into a JSON value.
pub fn decode_payload(event: &str, text: &str) -> CoreResult<JsonValue> {
    serde_json::from_str(text).map_err(|e| CoreError::invalid_payload(event, e.to_string()))
}

/// A serializer that produces nothing and fails on `NaN` or infinite floats.
mod finite {
    use std::fmt;

    use serde::Serialize;
    use serde::ser::{self, Serializer};

    #[derive(Debug)]
    pub struct NonFinite(String);

    impl fmt::Display for NonFinite {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for NonFinite {}

    impl ser::Error for NonFinite {
        fn custom<T: fmt::Display>(msg: T) -> Self {
            NonFinite(msg.to_string())
        }
    }

    fn check(value: f64) -> Result<(), NonFinite> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(NonFinite(format!("non-finite float {value} has no JSON form")))
        }
    }

    #[derive(Clone, Copy)]
    pub struct FiniteFloats;

    type Res = Result<(), NonFinite>;

    impl Serializer for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;
        type SerializeSeq = Self;
        type SerializeTuple = Self;
        type SerializeTupleStruct = Self;
        type SerializeTupleVariant = Self;
        type SerializeMap = Self;
        type SerializeStruct = Self;
        type SerializeStructVariant = Self;

        fn serialize_f32(self, v: f32) -> Res {
            check(f64::from(v))
        }

        fn serialize_f64(self, v: f64) -> Res {
            check(v)
        }

        fn serialize_bool(self, _: bool) -> Res {
            Ok(())
        }

        fn serialize_i8(self, _: i8) -> Res {
            Ok(())
        }

        fn serialize_i16(self, _: i16) -> Res {
            Ok(())
        }

        fn serialize_i32(self, _: i32) -> Res {
            Ok(())
        }

        fn serialize_i64(self, _: i64) -> Res {
            Ok(())
        }

        fn serialize_i128(self, _: i128) -> Res {
            Ok(())
        }

        fn serialize_u8(self, _: u8) -> Res {
            Ok(())
        }

        fn serialize_u16(self, _: u16) -> Res {
            Ok(())
        }

        fn serialize_u32(self, _: u32) -> Res {
            Ok(())
        }

        fn serialize_u64(self, _: u64) -> Res {
            Ok(())
        }

        fn serialize_u128(self, _: u128) -> Res {
            Ok(())
        }

        fn serialize_char(self, _: char) -> Res {
            Ok(())
        }

        fn serialize_str(self, _: &str) -> Res {
            Ok(())
        }

        fn serialize_bytes(self, _: &[u8]) -> Res {
            Ok(())
        }

        fn serialize_none(self) -> Res {
            Ok(())
        }

        fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Res {
            value.serialize(self)
        }

        fn serialize_unit(self) -> Res {
            Ok(())
        }

        fn serialize_unit_struct(self, _: &'static str) -> Res {
            Ok(())
        }

        fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Res {
            Ok(())
        }

        fn serialize_newtype_struct<T: ?Sized + Serialize>(
            self,
            _: &'static str,
            value: &T,
        ) -> Res {
            value.serialize(self)
        }

        fn serialize_newtype_variant<T: ?Sized + Serialize>(
            self,
            _: &'static str,
            _: u32,
            _: &'static str,
            value: &T,
        ) -> Res {
            value.serialize(self)
        }

        fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
            Ok(self)
        }

        fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
            Ok(self)
        }

        fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
            Ok(self)
        }

        fn serialize_tuple_variant(
            self,
            _: &'static str,
            _: u32,
            _: &'static str,
            _: usize,
        ) -> Result<Self, NonFinite> {
            Ok(self)
        }

        fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
            Ok(self)
        }

        fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
            Ok(self)
        }

        fn serialize_struct_variant(
            self,
            _: &'static str,
            _: u32,
            _: &'static str,
            _: usize,
        ) -> Result<Self, NonFinite> {
            Ok(self)
        }
    }

    impl ser::SerializeSeq for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }

    impl ser::SerializeTuple for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }

    impl ser::SerializeTupleStruct for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }

    impl ser::SerializeTupleVariant for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }

    impl ser::SerializeMap for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Res {
            key.serialize(*self)
        }

        fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }

    impl ser::SerializeStruct for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }

    impl ser::SerializeStructVariant for FiniteFloats {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Res {
            value.serialize(*self)
        }

        fn end(self) -> Res {
            Ok(())
        }
    }
}
