// Copyright (c) 2022-2023 The MobileCoin Foundation

use heapless::String;

use crate::{codec::Field, ProtoError};

/// Copy a string field into fixed-capacity storage, truncating at a
/// character boundary where the value exceeds capacity `N`
pub(crate) fn truncated_string<const N: usize>(f: &Field) -> Result<String<N>, ProtoError> {
    let s = f.str().ok_or(ProtoError::InvalidField)??;
    Ok(truncate_str(s))
}

/// Copy a string into fixed-capacity storage, truncating at a character boundary
pub(crate) fn truncate_str<const N: usize>(s: &str) -> String<N> {
    let mut end = s.len().min(N);
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    let mut out = String::new();
    // Truncated to capacity above
    let _ = out.push_str(&s[..end]);

    out
}

/// Fetch a varint field as a bool
pub(crate) fn field_bool(f: &Field) -> Result<bool, ProtoError> {
    f.varint().map(|v| v != 0).ok_or(ProtoError::InvalidField)
}

/// Fetch a varint field as a u32
pub(crate) fn field_u32(f: &Field) -> Result<u32, ProtoError> {
    f.varint32().ok_or(ProtoError::InvalidField)?
}

/// Fetch a length-delimited field as bytes
pub(crate) fn field_bytes<'a>(f: &Field<'a>) -> Result<&'a [u8], ProtoError> {
    f.bytes().ok_or(ProtoError::InvalidField)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::FieldValue;

    #[test]
    fn truncate_at_char_boundary() {
        // 'é' is two bytes, capacity 4 would split the second one
        let f = Field {
            number: 10,
            value: FieldValue::Bytes("aéé".as_bytes()),
        };

        let s: String<4> = truncated_string(&f).unwrap();
        assert_eq!(s.as_str(), "aé");

        let s: String<16> = truncated_string(&f).unwrap();
        assert_eq!(s.as_str(), "aéé");
    }

    #[test]
    fn wrong_wire_type() {
        let f = Field {
            number: 1,
            value: FieldValue::Varint(1),
        };
        assert_eq!(field_bytes(&f), Err(ProtoError::InvalidField));
        assert_eq!(field_u32(&f), Ok(1));
        assert_eq!(field_bool(&f), Ok(true));
    }
}
