//! Tagged-field binary encoding
//!
//! Every struct is a flat run of fields. A field is
//! `[field number: u16][wire type: u8][payload]`, where the payload layout is
//! fixed by the wire type:
//!
//! | wire type | payload |
//! |-----------|---------|
//! | `U8`      | 1 byte (u8, bool) |
//! | `U16`     | 2 bytes big-endian |
//! | `U64`     | 8 bytes big-endian (u64, i64 two's complement) |
//! | `Bytes`   | u32 length + UTF-8 bytes |
//! | `Struct`  | u32 length + nested fields |
//! | `List`    | element wire type (u8) + u32 count + u32-length-prefixed elements |
//! | `Union`   | u16 discriminant + u32 length + nested fields |
//!
//! Field numbers are stable and only ever appended, so a reader skips numbers
//! it does not know instead of failing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use thiserror::Error;

/// Payload layout of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    U8 = 0,
    U16 = 1,
    U64 = 2,
    Bytes = 3,
    Struct = 4,
    List = 5,
    Union = 6,
}

impl TryFrom<u8> for WireType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::U8),
            1 => Ok(WireType::U16),
            2 => Ok(WireType::U64),
            3 => Ok(WireType::Bytes),
            4 => Ok(WireType::Struct),
            5 => Ok(WireType::List),
            6 => Ok(WireType::Union),
            _ => Err(DecodeError::InvalidWireType(value)),
        }
    }
}

/// Errors raised while turning model values into wire bytes
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("string of {0} bytes exceeds the wire limit")]
    StringTooLong(usize),

    #[error("list of {0} elements exceeds the wire limit")]
    ListTooLong(usize),

    #[error("duration {0:?} does not fit in i64 nanoseconds")]
    DurationOverflow(Duration),

    #[error("{kind} at index {index} does not exist in the applied configuration")]
    UnresolvedSubConfig { kind: &'static str, index: usize },

    #[error("field {field}: {source}")]
    Field {
        field: &'static str,
        source: Box<EncodeError>,
    },

    #[error("element {index}: {source}")]
    Element {
        index: usize,
        source: Box<EncodeError>,
    },
}

impl EncodeError {
    /// Attach the name of the field being encoded
    pub fn in_field(self, field: &'static str) -> Self {
        EncodeError::Field {
            field,
            source: Box::new(self),
        }
    }
}

/// Errors raised while reading wire bytes; any of them rejects the whole message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid wire type: {0}")]
    InvalidWireType(u8),

    #[error("field {field} has wire type {actual:?}, expected {expected:?}")]
    UnexpectedWireType {
        field: &'static str,
        expected: WireType,
        actual: WireType,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown {union} variant: {discriminant}")]
    UnknownVariant {
        union: &'static str,
        discriminant: u16,
    },

    #[error("field {field}: negative duration {nanos}ns")]
    NegativeDuration { field: &'static str, nanos: i64 },

    #[error("field {field}: invalid boolean value {value}")]
    InvalidBool { field: &'static str, value: u8 },

    #[error("field {0}: invalid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("field {field}: {source}")]
    Field {
        field: &'static str,
        source: Box<DecodeError>,
    },

    #[error("element {index}: {source}")]
    Element {
        index: usize,
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Attach the name of the field being decoded
    pub fn in_field(self, field: &'static str) -> Self {
        DecodeError::Field {
            field,
            source: Box::new(self),
        }
    }

    /// Innermost error, with all field and element context stripped
    pub fn root_cause(&self) -> &DecodeError {
        match self {
            DecodeError::Field { source, .. } | DecodeError::Element { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

fn wire_len(len: usize, too_long: fn(usize) -> EncodeError) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| too_long(len))
}

/// Builds the field sequence of one struct
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    fn header(&mut self, field: u16, wire_type: WireType) {
        self.buf.put_u16(field);
        self.buf.put_u8(wire_type as u8);
    }

    /// `len` must come from [`wire_len`] on `data`; checking first keeps a
    /// failed put from leaving a dangling header behind
    fn put_len_prefixed(&mut self, len: u32, data: &[u8]) {
        self.buf.put_u32(len);
        self.buf.put_slice(data);
    }

    pub fn put_u8(&mut self, field: u16, value: u8) {
        self.header(field, WireType::U8);
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, field: u16, value: bool) {
        self.put_u8(field, u8::from(value));
    }

    pub fn put_u16(&mut self, field: u16, value: u16) {
        self.header(field, WireType::U16);
        self.buf.put_u16(value);
    }

    pub fn put_u64(&mut self, field: u16, value: u64) {
        self.header(field, WireType::U64);
        self.buf.put_u64(value);
    }

    pub fn put_i64(&mut self, field: u16, value: i64) {
        self.header(field, WireType::U64);
        self.buf.put_i64(value);
    }

    /// Durations travel as signed 64-bit nanosecond counts
    pub fn put_duration(&mut self, field: u16, value: Duration) -> Result<(), EncodeError> {
        let nanos =
            i64::try_from(value.as_nanos()).map_err(|_| EncodeError::DurationOverflow(value))?;
        self.put_i64(field, nanos);
        Ok(())
    }

    pub fn put_str(&mut self, field: u16, value: &str) -> Result<(), EncodeError> {
        let len = wire_len(value.len(), EncodeError::StringTooLong)?;
        self.header(field, WireType::Bytes);
        self.put_len_prefixed(len, value.as_bytes());
        Ok(())
    }

    pub fn put_struct<F>(&mut self, field: u16, encode: F) -> Result<(), EncodeError>
    where
        F: FnOnce(&mut WireWriter) -> Result<(), EncodeError>,
    {
        let mut nested = WireWriter::new();
        encode(&mut nested)?;
        let len = wire_len(nested.buf.len(), EncodeError::StringTooLong)?;
        self.header(field, WireType::Struct);
        self.put_len_prefixed(len, &nested.buf);
        Ok(())
    }

    pub fn put_union<F>(&mut self, field: u16, discriminant: u16, encode: F) -> Result<(), EncodeError>
    where
        F: FnOnce(&mut WireWriter) -> Result<(), EncodeError>,
    {
        let mut nested = WireWriter::new();
        encode(&mut nested)?;
        let len = wire_len(nested.buf.len(), EncodeError::StringTooLong)?;
        self.header(field, WireType::Union);
        self.buf.put_u16(discriminant);
        self.put_len_prefixed(len, &nested.buf);
        Ok(())
    }

    pub fn put_str_list(&mut self, field: u16, items: &[String]) -> Result<(), EncodeError> {
        let count = wire_len(items.len(), EncodeError::ListTooLong)?;
        let lens = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                wire_len(item.len(), EncodeError::StringTooLong).map_err(|e| {
                    EncodeError::Element {
                        index,
                        source: Box::new(e),
                    }
                })
            })
            .collect::<Result<Vec<u32>, _>>()?;

        self.header(field, WireType::List);
        self.buf.put_u8(WireType::Bytes as u8);
        self.buf.put_u32(count);
        for (len, item) in lens.into_iter().zip(items) {
            self.put_len_prefixed(len, item.as_bytes());
        }
        Ok(())
    }

    /// Encode a list sized exactly to `items`; each element is encoded on its
    /// own and a failure reports the offending index
    pub fn put_struct_list<T, F>(
        &mut self,
        field: u16,
        items: &[T],
        encode: F,
    ) -> Result<(), EncodeError>
    where
        F: Fn(&mut WireWriter, &T) -> Result<(), EncodeError>,
    {
        let count = wire_len(items.len(), EncodeError::ListTooLong)?;
        let mut elements = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut nested = WireWriter::new();
            encode(&mut nested, item).map_err(|e| EncodeError::Element {
                index,
                source: Box::new(e),
            })?;
            let len = wire_len(nested.buf.len(), EncodeError::StringTooLong).map_err(|e| {
                EncodeError::Element {
                    index,
                    source: Box::new(e),
                }
            })?;
            elements.push((len, nested.buf));
        }

        self.header(field, WireType::List);
        self.buf.put_u8(WireType::Struct as u8);
        self.buf.put_u32(count);
        for (len, element) in &elements {
            self.put_len_prefixed(*len, element);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// One decoded field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireField {
    pub number: u16,
    pub value: WireValue,
}

/// Raw field payload, typed only by its wire type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    U8(u8),
    U16(u16),
    U64(u64),
    Bytes(Bytes),
    Struct(Bytes),
    List { element: WireType, items: Vec<Bytes> },
    Union { discriminant: u16, payload: Bytes },
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::U8(_) => WireType::U8,
            WireValue::U16(_) => WireType::U16,
            WireValue::U64(_) => WireType::U64,
            WireValue::Bytes(_) => WireType::Bytes,
            WireValue::Struct(_) => WireType::Struct,
            WireValue::List { .. } => WireType::List,
            WireValue::Union { .. } => WireType::Union,
        }
    }

    fn mismatch(&self, field: &'static str, expected: WireType) -> DecodeError {
        DecodeError::UnexpectedWireType {
            field,
            expected,
            actual: self.wire_type(),
        }
    }

    pub fn into_u8(self, field: &'static str) -> Result<u8, DecodeError> {
        match self {
            WireValue::U8(v) => Ok(v),
            other => Err(other.mismatch(field, WireType::U8)),
        }
    }

    pub fn into_bool(self, field: &'static str) -> Result<bool, DecodeError> {
        match self.into_u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidBool { field, value }),
        }
    }

    pub fn into_u16(self, field: &'static str) -> Result<u16, DecodeError> {
        match self {
            WireValue::U16(v) => Ok(v),
            other => Err(other.mismatch(field, WireType::U16)),
        }
    }

    pub fn into_u64(self, field: &'static str) -> Result<u64, DecodeError> {
        match self {
            WireValue::U64(v) => Ok(v),
            other => Err(other.mismatch(field, WireType::U64)),
        }
    }

    pub fn into_i64(self, field: &'static str) -> Result<i64, DecodeError> {
        self.into_u64(field).map(|v| v as i64)
    }

    pub fn into_duration(self, field: &'static str) -> Result<Duration, DecodeError> {
        let nanos = self.into_i64(field)?;
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .map_err(|_| DecodeError::NegativeDuration { field, nanos })
    }

    pub fn into_string(self, field: &'static str) -> Result<String, DecodeError> {
        match self {
            WireValue::Bytes(b) => utf8(b, field),
            other => Err(other.mismatch(field, WireType::Bytes)),
        }
    }

    pub fn into_struct(self, field: &'static str) -> Result<Bytes, DecodeError> {
        match self {
            WireValue::Struct(b) => Ok(b),
            other => Err(other.mismatch(field, WireType::Struct)),
        }
    }

    pub fn into_union(self, field: &'static str) -> Result<(u16, Bytes), DecodeError> {
        match self {
            WireValue::Union {
                discriminant,
                payload,
            } => Ok((discriminant, payload)),
            other => Err(other.mismatch(field, WireType::Union)),
        }
    }

    /// Raw list elements, checked against the expected element wire type
    pub fn into_list(
        self,
        field: &'static str,
        expected: WireType,
    ) -> Result<Vec<Bytes>, DecodeError> {
        match self {
            WireValue::List { element, items } if element == expected => Ok(items),
            WireValue::List { element, .. } => Err(DecodeError::UnexpectedWireType {
                field,
                expected,
                actual: element,
            }),
            other => Err(other.mismatch(field, WireType::List)),
        }
    }

    pub fn into_string_list(self, field: &'static str) -> Result<Vec<String>, DecodeError> {
        self.into_list(field, WireType::Bytes)?
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                utf8(item, field).map_err(|e| DecodeError::Element {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    }
}

fn utf8(bytes: Bytes, field: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
}

/// Walks the field sequence of one struct
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn take_len_prefixed(&mut self) -> Result<Bytes, DecodeError> {
        self.need(4)?;
        let len = self.buf.get_u32() as usize;
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Next field, or `None` once the struct is exhausted
    pub fn next_field(&mut self) -> Result<Option<WireField>, DecodeError> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }

        self.need(3)?;
        let number = self.buf.get_u16();
        let wire_type = WireType::try_from(self.buf.get_u8())?;

        let value = match wire_type {
            WireType::U8 => {
                self.need(1)?;
                WireValue::U8(self.buf.get_u8())
            }
            WireType::U16 => {
                self.need(2)?;
                WireValue::U16(self.buf.get_u16())
            }
            WireType::U64 => {
                self.need(8)?;
                WireValue::U64(self.buf.get_u64())
            }
            WireType::Bytes => WireValue::Bytes(self.take_len_prefixed()?),
            WireType::Struct => WireValue::Struct(self.take_len_prefixed()?),
            WireType::List => {
                self.need(5)?;
                let element = WireType::try_from(self.buf.get_u8())?;
                let count = self.buf.get_u32() as usize;
                // Every element costs at least its 4-byte length prefix
                let mut items = Vec::with_capacity(count.min(self.buf.remaining() / 4));
                for _ in 0..count {
                    items.push(self.take_len_prefixed()?);
                }
                WireValue::List { element, items }
            }
            WireType::Union => {
                self.need(2)?;
                let discriminant = self.buf.get_u16();
                let payload = self.take_len_prefixed()?;
                WireValue::Union {
                    discriminant,
                    payload,
                }
            }
        };

        Ok(Some(WireField { number, value }))
    }
}
