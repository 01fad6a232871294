// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Minimal protobuf field codec
//!
//! Supports the two wire types used by the consumed message set, varints (0)
//! and length-delimited values (2). Decoding is cursor based and bounds
//! checked, an attempt to read past the end of a buffer returns
//! [ProtoError::Truncated] rather than panicking.
//!
//! ## Field encoding:
//! ```text
//! +-----------------------------+-----------------------------------+
//! | TAG (varint)                | VALUE                             |
//! | field_number << 3 | wire    | varint, or LEN (varint) + bytes   |
//! +-----------------------------+-----------------------------------+
//! ```

use crate::ProtoError;

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Supported protobuf wire types
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    LengthDelimited = 2,
}

/// Compute the tag for a field number and wire type
pub const fn tag(field_number: u32, wire_type: WireType) -> u32 {
    (field_number << 3) | wire_type as u32
}

/// Compute the encoded length of a varint
pub const fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Encode a 64-bit varint into the provided buffer, returning the encoded length
pub fn encode_varint64(v: u64, buff: &mut [u8]) -> Result<usize, ProtoError> {
    let n = varint_len(v);
    if buff.len() < n {
        return Err(ProtoError::BufferFull);
    }

    let mut v = v;
    for b in buff[..n].iter_mut() {
        *b = (v as u8 & 0x7f) | 0x80;
        v >>= 7;
    }
    buff[n - 1] &= 0x7f;

    Ok(n)
}

/// Encode a 32-bit varint into the provided buffer, returning the encoded length
pub fn encode_varint(v: u32, buff: &mut [u8]) -> Result<usize, ProtoError> {
    encode_varint64(v as u64, buff)
}

/// Decode a 64-bit varint starting at `offset`, returning the value and the
/// offset following the varint
pub fn decode_varint64(buff: &[u8], offset: usize) -> Result<(u64, usize), ProtoError> {
    let data = buff.get(offset..).ok_or(ProtoError::Truncated)?;

    let mut value = 0u64;
    for (i, b) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(ProtoError::VarintOverflow);
        }

        let bits = (b & 0x7f) as u64;

        // Only the lowest bit of the tenth byte fits in a u64
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(ProtoError::VarintOverflow);
        }

        value |= bits << (7 * i);

        if b & 0x80 == 0 {
            return Ok((value, offset + i + 1));
        }
    }

    Err(ProtoError::Truncated)
}

/// Decode a 32-bit varint starting at `offset`, returning the value and the
/// offset following the varint
pub fn decode_varint(buff: &[u8], offset: usize) -> Result<(u32, usize), ProtoError> {
    let (v, next) = decode_varint64(buff, offset)?;
    let v = u32::try_from(v).map_err(|_| ProtoError::VarintOverflow)?;
    Ok((v, next))
}

/// Field value, borrowed from the decode buffer where length-delimited
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    /// Wire type for this value
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldValue::Varint(_) => WireType::Varint,
            FieldValue::Bytes(_) => WireType::LengthDelimited,
        }
    }

    /// Encoded length of this value (excluding tag)
    pub fn encode_len(&self) -> usize {
        match self {
            FieldValue::Varint(v) => varint_len(*v),
            FieldValue::Bytes(b) => varint_len(b.len() as u64) + b.len(),
        }
    }
}

/// Decoded field
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Field<'a> {
    pub number: u32,
    pub value: FieldValue<'a>,
}

impl<'a> Field<'a> {
    /// Fetch varint value if this is a varint field
    pub fn varint(&self) -> Option<u64> {
        match self.value {
            FieldValue::Varint(v) => Some(v),
            _ => None,
        }
    }

    /// Fetch varint value truncated to u32, failing on overflow
    pub fn varint32(&self) -> Option<Result<u32, ProtoError>> {
        self.varint()
            .map(|v| u32::try_from(v).map_err(|_| ProtoError::VarintOverflow))
    }

    /// Fetch bytes if this is a length-delimited field
    pub fn bytes(&self) -> Option<&'a [u8]> {
        match self.value {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Fetch a UTF-8 string if this is a length-delimited field
    pub fn str(&self) -> Option<Result<&'a str, ProtoError>> {
        self.bytes()
            .map(|b| core::str::from_utf8(b).map_err(|_| ProtoError::InvalidUtf8))
    }
}

/// Decode the field starting at `offset`, returning the field and the offset
/// of the following field, or `None` at the end of the buffer
pub fn next_field(buff: &[u8], offset: usize) -> Result<Option<(Field<'_>, usize)>, ProtoError> {
    if offset >= buff.len() {
        return Ok(None);
    }

    let (tag, index) = decode_varint(buff, offset)?;

    let number = tag >> 3;
    if number == 0 {
        return Err(ProtoError::InvalidField);
    }

    let wire = (tag & 0x07) as u8;
    let wire_type = WireType::try_from(wire).map_err(|_| ProtoError::UnsupportedWireType(wire))?;

    let (value, next) = match wire_type {
        WireType::Varint => {
            let (v, next) = decode_varint64(buff, index)?;
            (FieldValue::Varint(v), next)
        }
        WireType::LengthDelimited => {
            let (len, start) = decode_varint(buff, index)?;
            let end = start
                .checked_add(len as usize)
                .ok_or(ProtoError::Truncated)?;
            let b = buff.get(start..end).ok_or(ProtoError::Truncated)?;
            (FieldValue::Bytes(b), end)
        }
    };

    Ok(Some((Field { number, value }, next)))
}

/// Iterator over the fields of an encoded message
///
/// Yields each field in order, stopping after the first error.
#[derive(Clone, Debug)]
pub struct FieldReader<'a> {
    buff: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> FieldReader<'a> {
    /// Create a new reader over an encoded message
    pub fn new(buff: &'a [u8]) -> Self {
        Self {
            buff,
            offset: 0,
            done: false,
        }
    }

    /// Current offset into the message
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<Field<'a>, ProtoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match next_field(self.buff, self.offset) {
            Ok(Some((f, next))) => {
                self.offset = next;
                Some(Ok(f))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Encoded length of a field including its tag
pub fn field_len(field_number: u32, value: &FieldValue) -> usize {
    varint_len(tag(field_number, value.wire_type()) as u64) + value.encode_len()
}

/// Write a field into the provided buffer, returning the encoded length
pub fn write_field(
    buff: &mut [u8],
    field_number: u32,
    value: FieldValue,
) -> Result<usize, ProtoError> {
    if field_number == 0 {
        return Err(ProtoError::InvalidField);
    }
    if buff.len() < field_len(field_number, &value) {
        return Err(ProtoError::BufferFull);
    }

    let mut index = encode_varint(tag(field_number, value.wire_type()), buff)?;

    match value {
        FieldValue::Varint(v) => {
            index += encode_varint64(v, &mut buff[index..])?;
        }
        FieldValue::Bytes(b) => {
            index += encode_varint64(b.len() as u64, &mut buff[index..])?;
            buff[index..][..b.len()].copy_from_slice(b);
            index += b.len();
        }
    }

    Ok(index)
}

/// Cursor for writing a sequence of fields into a buffer
pub struct Writer<'a> {
    buff: &'a mut [u8],
    index: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buff: &'a mut [u8]) -> Self {
        Self { buff, index: 0 }
    }

    /// Write a varint field
    pub fn varint(&mut self, field_number: u32, v: u64) -> Result<&mut Self, ProtoError> {
        self.index += write_field(&mut self.buff[self.index..], field_number, FieldValue::Varint(v))?;
        Ok(self)
    }

    /// Write a boolean as a varint field
    pub fn bool(&mut self, field_number: u32, v: bool) -> Result<&mut Self, ProtoError> {
        self.varint(field_number, v as u64)
    }

    /// Write a length-delimited field
    pub fn bytes(&mut self, field_number: u32, b: &[u8]) -> Result<&mut Self, ProtoError> {
        self.index += write_field(&mut self.buff[self.index..], field_number, FieldValue::Bytes(b))?;
        Ok(self)
    }

    /// Write a string as a length-delimited field
    pub fn str(&mut self, field_number: u32, s: &str) -> Result<&mut Self, ProtoError> {
        self.bytes(field_number, s.as_bytes())
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    /// Finish writing, returning the encoded length
    pub fn finish(self) -> usize {
        self.index
    }
}
