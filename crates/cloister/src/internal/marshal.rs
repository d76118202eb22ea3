use rquickjs::{Ctx, IntoJs, Value as JsValue};
use serde::{
    Serialize,
    de::{DeserializeSeed, Visitor},
    ser::{SerializeMap, SerializeSeq},
};

use crate::value::{CborBytesMut, Value};

const MAX_DEPTH: usize = 128;

/// Deep-copy a sandbox value out as CBOR.
///
/// `undefined` at the top level becomes the empty [`Value`]; anywhere below it
/// reads as `null`. Functions, promises and symbols cannot be copied.
pub(crate) fn to_host(value: &JsValue<'_>) -> Result<Value, String> {
    if value.is_undefined() {
        return Ok(Value::default());
    }
    let mut serializer = minicbor_serde::Serializer::new(CborBytesMut::default());
    Outbound(value.clone(), MAX_DEPTH)
        .serialize(serializer.serialize_unit_as_null(true))
        .map_err(|e| e.to_string())?;
    Ok(Value::from_cbor(serializer.into_encoder().into_writer().freeze()))
}

/// Like [`to_host`], but a value that cannot be copied becomes a string
/// describing it.
pub(crate) fn to_host_lossy(value: &JsValue<'_>) -> Value {
    to_host(value).unwrap_or_else(|err| {
        let description = if err.is_empty() {
            format!("[{:?}]", value.type_of())
        } else {
            format!("[{:?}: {err}]", value.type_of())
        };
        Value::from_serde(&description).unwrap_or_default()
    })
}

/// Materialize a host value as fresh sandbox objects.
pub(crate) fn to_js<'js>(ctx: &Ctx<'js>, value: &Value) -> Result<JsValue<'js>, String> {
    if value.is_empty() {
        return Ok(JsValue::new_undefined(ctx.clone()));
    }
    let mut deserializer = minicbor_serde::Deserializer::new(value.as_cbor());
    JsSeed(ctx.clone())
        .deserialize(&mut deserializer)
        .map_err(|e| e.to_string())
}

struct Outbound<'js>(JsValue<'js>, usize);

impl<'js> Outbound<'js> {
    const fn child(&self, value: JsValue<'js>) -> Self {
        Self(value, self.1 - 1)
    }
}

impl Serialize for Outbound<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error;

        if self.1 == 0 {
            return Err(S::Error::custom(
                "maximum copy depth exceeded, possible circular reference",
            ));
        }

        let v = &self.0;
        if v.is_null() || v.is_undefined() {
            serializer.serialize_none()
        } else if let Some(b) = v.as_bool() {
            serializer.serialize_bool(b)
        } else if let Some(i) = v.as_int() {
            serializer.serialize_i32(i)
        } else if let Some(f) = v.as_number() {
            serializer.serialize_f64(f)
        } else if let Some(s) = v.as_string() {
            let s = s.to_string().map_err(S::Error::custom)?;
            serializer.serialize_str(&s)
        } else if v.is_function() {
            Err(S::Error::custom("functions cannot cross the sandbox boundary"))
        } else if v.is_promise() {
            Err(S::Error::custom(
                "promises cannot cross the sandbox boundary, await them first",
            ))
        } else if let Some(arr) = v.as_array() {
            let len = arr.len();
            let mut seq = serializer.serialize_seq(Some(len))?;
            for i in 0..len {
                let elem: JsValue<'_> = arr.get(i).map_err(S::Error::custom)?;
                seq.serialize_element(&self.child(elem))?;
            }
            seq.end()
        } else if let Some(obj) = v.as_object() {
            if let Some(buf) = obj.as_array_buffer()
                && let Some(bytes) = buf.as_bytes()
            {
                return serializer.serialize_bytes(bytes);
            }
            if let Some(ta) = obj.as_typed_array::<u8>()
                && let Some(bytes) = ta.as_bytes()
            {
                return serializer.serialize_bytes(bytes);
            }
            let props: Vec<(rquickjs::atom::Atom<'_>, JsValue<'_>)> = obj
                .own_props(rquickjs::object::Filter::new().string().enum_only())
                .collect::<rquickjs::Result<_>>()
                .map_err(S::Error::custom)?;
            let mut map = serializer.serialize_map(Some(props.len()))?;
            for (key, val) in props {
                let key = key.to_string().map_err(S::Error::custom)?;
                map.serialize_entry(&key, &self.child(val))?;
            }
            map.end()
        } else {
            Err(S::Error::custom(format!(
                "{:?} values cannot cross the sandbox boundary",
                v.type_of()
            )))
        }
    }
}

struct JsSeed<'js>(Ctx<'js>);

impl<'de, 'js> DeserializeSeed<'de> for JsSeed<'js> {
    type Value = JsValue<'js>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(JsVisitor(self.0))
    }
}

struct JsVisitor<'js>(Ctx<'js>);

impl<'js> JsVisitor<'js> {
    fn lift<T, E>(&self, v: T) -> Result<JsValue<'js>, E>
    where
        T: IntoJs<'js>,
        E: serde::de::Error,
    {
        v.into_js(&self.0).map_err(E::custom)
    }
}

impl<'de, 'js> Visitor<'de> for JsVisitor<'js> {
    type Value = JsValue<'js>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a value that can be copied into the sandbox")
    }

    fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Self::Value, E> {
        self.lift(v)
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        match i32::try_from(v) {
            Ok(i) => self.lift(i),
            #[allow(clippy::cast_precision_loss)]
            Err(_) => self.lift(v as f64),
        }
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        match i32::try_from(v) {
            Ok(i) => self.lift(i),
            #[allow(clippy::cast_precision_loss)]
            Err(_) => self.lift(v as f64),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_i128<E: serde::de::Error>(self, v: i128) -> Result<Self::Value, E> {
        self.lift(v as f64)
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u128<E: serde::de::Error>(self, v: u128) -> Result<Self::Value, E> {
        self.lift(v as f64)
    }

    fn visit_f32<E: serde::de::Error>(self, v: f32) -> Result<Self::Value, E> {
        self.lift(f64::from(v))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
        self.lift(v)
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        rquickjs::String::from_str(self.0.clone(), v)
            .map(rquickjs::String::into_value)
            .map_err(E::custom)
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        self.visit_byte_buf(v.to_vec())
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        rquickjs::ArrayBuffer::new(self.0.clone(), v)
            .map(rquickjs::ArrayBuffer::into_value)
            .map_err(E::custom)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(JsValue::new_null(self.0))
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(JsValue::new_null(self.0))
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        JsSeed(self.0).deserialize(deserializer)
    }

    fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        JsSeed(self.0).deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        use serde::de::Error;

        let arr = rquickjs::Array::new(self.0.clone()).map_err(A::Error::custom)?;
        let mut idx = 0usize;
        while let Some(val) = seq.next_element_seed(JsSeed(self.0.clone()))? {
            arr.set(idx, val).map_err(A::Error::custom)?;
            idx += 1;
        }
        Ok(arr.into_value())
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        use serde::de::Error;

        let obj = rquickjs::Object::new(self.0.clone()).map_err(A::Error::custom)?;
        while let Some((key, val)) =
            map.next_entry_seed(JsSeed(self.0.clone()), JsSeed(self.0.clone()))?
        {
            obj.set::<JsValue<'_>, JsValue<'_>>(key, val)
                .map_err(A::Error::custom)?;
        }
        Ok(obj.into_value())
    }
}
