use std::{
    convert::Infallible,
    io::{self, Write},
};

use bytes::{Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

/// CBOR encoding of `null`.
const CBOR_NULL: &[u8] = &[0xf6];

/// Marshalled value crossing the sandbox boundary.
///
/// A `Value` is an immutable structural copy encoded as CBOR. It can only hold
/// primitives, byte strings, maps and sequences, so it never aliases memory on
/// either side of the boundary. The empty value (`Value::default()`) means
/// "no value" and surfaces as `undefined` inside the sandbox.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Value(Bytes);

impl Value {
    #[must_use]
    pub fn from_cbor(value: impl Into<Bytes>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub const fn null() -> Self {
        Self(Bytes::from_static(CBOR_NULL))
    }

    #[must_use]
    pub fn as_cbor(&self) -> &[u8] {
        self.0.as_ref()
    }

    #[must_use]
    pub fn into_cbor(self) -> Bytes {
        self.0
    }

    /// Returns `true` for the "no value" marker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert a JSON value into a runtime `Value`.
    ///
    /// # Errors
    /// Returns an error if CBOR serialization fails.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, Error> {
        Self::from_serde(value)
    }

    /// Convert a runtime `Value` into a JSON value.
    ///
    /// The empty value converts to `null`.
    ///
    /// # Errors
    /// Returns an error if CBOR parsing or JSON parsing fails.
    pub fn to_json_value(&self) -> Result<serde_json::Value, Error> {
        serde_json::from_slice(&self.to_json_bytes()?).map_err(Error::from)
    }

    /// Convert a JSON string into a runtime `Value`.
    ///
    /// # Errors
    /// Returns an error if JSON parsing or CBOR serialization fails.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut serializer = minicbor_serde::Serializer::new(CborBytesMut::default());
        serde_transcode::Transcoder::new(&mut serde_json::Deserializer::from_str(json))
            .serialize(serializer.serialize_unit_as_null(true))?;
        Ok(Self(serializer.into_encoder().into_writer().freeze()))
    }

    /// Convert a runtime `Value` into a JSON string.
    ///
    /// # Errors
    /// Returns an error if CBOR parsing or JSON serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(String::from_utf8(self.to_json_bytes()?)?)
    }

    /// Serialize a serde value into a runtime `Value`.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let mut serializer = minicbor_serde::Serializer::new(CborBytesMut::default());
        value.serialize(serializer.serialize_unit_as_null(true))?;
        Ok(Self(serializer.into_encoder().into_writer().freeze()))
    }

    /// Deserialize a runtime `Value` into a serde value.
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn to_serde<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let mut deserializer = minicbor_serde::Deserializer::new(self.cbor_or_null());
        Ok(T::deserialize(&mut deserializer)?)
    }

    fn cbor_or_null(&self) -> &[u8] {
        if self.0.is_empty() {
            CBOR_NULL
        } else {
            self.0.as_ref()
        }
    }

    fn to_json_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut o = vec![];
        serde_transcode::Transcoder::new(&mut minicbor_serde::Deserializer::new(
            self.cbor_or_null(),
        ))
        .serialize(&mut serde_json::Serializer::with_formatter(
            &mut o,
            Base64Formatter,
        ))?;
        Ok(o)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),
    #[error("CBOR decode error")]
    CborDecode(#[from] minicbor_serde::error::DecodeError),
    #[error("CBOR encode error")]
    CborEncode(#[from] minicbor_serde::error::EncodeError<Infallible>),
    #[error("UTF-8 encoding error")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Byte strings have no JSON form; they are written as base64 strings.
struct Base64Formatter;

impl serde_json::ser::Formatter for Base64Formatter {
    fn write_byte_array<W>(&mut self, mut writer: &mut W, value: &[u8]) -> io::Result<()>
    where
        W: io::Write + ?Sized,
    {
        writer.write_all(b"\"")?;
        base64::write::EncoderWriter::new(&mut writer, &base64::engine::general_purpose::STANDARD)
            .write_all(value)?;
        writer.write_all(b"\"")
    }
}

#[derive(Default)]
pub(crate) struct CborBytesMut(BytesMut);

impl CborBytesMut {
    pub(crate) fn freeze(self) -> Bytes {
        self.0.freeze()
    }
}

impl minicbor::encode::Write for CborBytesMut {
    type Error = Infallible;

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.0.extend_from_slice(buf);
        Ok(())
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Value> for Bytes {
    fn from(value: Value) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        self.as_cbor()
    }
}
