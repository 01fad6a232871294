// Copyright (c) 2022-2023 The MobileCoin Foundation

use core::fmt::{Display, Formatter};

/// Wire protocol encode / decode error
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtoError {
    /// Input ended before the value was complete
    Truncated,
    /// Output buffer too small for encoded object
    BufferFull,
    /// Varint exceeds the width of the target integer
    VarintOverflow,
    /// Wire type other than varint (0) or length-delimited (2)
    UnsupportedWireType(u8),
    /// Field number zero is reserved
    InvalidField,
    /// Required field not found before end of message
    FieldMissing(u32),
    /// Field present with an unexpected length
    InvalidLength,
    /// String field is not valid UTF-8
    InvalidUtf8,
    /// Field value not recognised
    InvalidValue,
    /// Value exceeds fixed-capacity storage
    Capacity,
    /// Underlying primitive encoding failed
    Encoding,
}

impl Display for ProtoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtoError::Truncated => write!(f, "message truncated"),
            ProtoError::BufferFull => write!(f, "output buffer too small"),
            ProtoError::VarintOverflow => write!(f, "varint overflow"),
            ProtoError::UnsupportedWireType(t) => write!(f, "unsupported wire type {t}"),
            ProtoError::InvalidField => write!(f, "invalid field number"),
            ProtoError::FieldMissing(n) => write!(f, "field {n} missing"),
            ProtoError::InvalidLength => write!(f, "invalid field length"),
            ProtoError::InvalidUtf8 => write!(f, "invalid utf-8 string"),
            ProtoError::InvalidValue => write!(f, "invalid field value"),
            ProtoError::Capacity => write!(f, "value exceeds capacity"),
            ProtoError::Encoding => write!(f, "primitive encoding failed"),
        }
    }
}

impl From<encdec::Error> for ProtoError {
    fn from(_: encdec::Error) -> Self {
        ProtoError::Encoding
    }
}
