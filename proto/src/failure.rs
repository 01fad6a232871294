// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Failure response, returned by the device when an operation is rejected
//! or cannot be completed

use encdec::{DecodeOwned, Encode};
use heapless::String;

use crate::{
    codec::{FieldReader, Writer},
    helpers::*,
    MessageType, ProtoError, WireStatic,
};

/// Device failure codes
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, strum::Display, strum::EnumIter, num_enum::TryFromPrimitive,
)]
#[repr(u32)]
pub enum FailureCode {
    UnexpectedMessage = 1,
    ButtonExpected = 2,
    DataError = 3,
    ActionCancelled = 4,
    PinExpected = 5,
    PinCancelled = 6,
    PinInvalid = 7,
    InvalidSignature = 8,
    ProcessError = 9,
    NotEnoughFunds = 10,
    NotInitialized = 11,
    PinMismatch = 12,
    WipeCodeMismatch = 13,
    InvalidSession = 14,
    FirmwareError = 99,
}

impl FailureCode {
    /// Check whether this failure indicates the user declined the action
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, FailureCode::ActionCancelled | FailureCode::PinCancelled)
    }
}

/// Maximum stored failure message length
pub const MAX_FAILURE_MESSAGE_LEN: usize = 128;

/// Failure response
///
/// ## Fields:
/// ```text
/// +-----+----------+---------+
/// | NUM | NAME     | TYPE    |
/// +-----+----------+---------+
/// |   1 | code     | varint  |
/// |   2 | message  | string  |
/// +-----+----------+---------+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct FailureResp {
    /// Raw failure code, zero where not provided
    pub code: u32,
    /// Human readable failure message
    pub message: String<MAX_FAILURE_MESSAGE_LEN>,
}

mod fields {
    pub const CODE: u32 = 1;
    pub const MESSAGE: u32 = 2;
}

impl FailureResp {
    /// Create a new failure response
    pub fn new(code: FailureCode, message: &str) -> Self {
        let mut m = String::new();
        for c in message.chars() {
            if m.push(c).is_err() {
                break;
            }
        }

        Self {
            code: code as u32,
            message: m,
        }
    }

    /// Resolve the failure code, if known
    pub fn failure_code(&self) -> Option<FailureCode> {
        FailureCode::try_from(self.code).ok()
    }

    /// Check whether this failure indicates the user declined the action
    pub fn is_user_rejection(&self) -> bool {
        self.failure_code()
            .map(|c| c.is_user_rejection())
            .unwrap_or(false)
    }
}

impl WireStatic for FailureResp {
    const MESSAGE_TYPE: MessageType = MessageType::Failure;
}

impl Encode for FailureResp {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = 1 + crate::codec::varint_len(self.code as u64);
        if !self.message.is_empty() {
            n += 1 + crate::codec::varint_len(self.message.len() as u64) + self.message.len();
        }
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut w = Writer::new(buff);

        w.varint(fields::CODE, self.code as u64)?;
        if !self.message.is_empty() {
            w.str(fields::MESSAGE, &self.message)?;
        }

        Ok(w.finish())
    }
}

impl DecodeOwned for FailureResp {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut r = Self::default();

        for f in FieldReader::new(buff) {
            let f = f?;

            match f.number {
                fields::CODE => r.code = field_u32(&f)?,
                fields::MESSAGE => r.message = truncated_string(&f)?,
                _ => (),
            }
        }

        Ok((r, buff.len()))
    }
}

#[cfg(test)]
mod test {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::test::encode_decode_message;

    #[test]
    fn failure_resp() {
        let f = FailureResp::new(FailureCode::ActionCancelled, "Cancelled");

        let mut buff = [0u8; 64];
        let n = encode_decode_message(&mut buff, &f);

        let mut expected = vec![0x08, 0x04, 0x12, 9];
        expected.extend_from_slice(b"Cancelled");
        assert_eq!(&buff[..n], &expected[..]);
    }

    #[test]
    fn failure_codes() {
        for c in FailureCode::iter() {
            let f = FailureResp::new(c, "");
            assert_eq!(f.failure_code(), Some(c));
            assert_eq!(
                f.is_user_rejection(),
                c == FailureCode::ActionCancelled || c == FailureCode::PinCancelled
            );
        }

        let f = FailureResp {
            code: 1234,
            ..Default::default()
        };
        assert_eq!(f.failure_code(), None);
        assert!(!f.is_user_rejection());
    }

    #[test]
    fn failure_message_truncated() {
        let long = [b'x'; 200];

        let mut buff = [0u8; 256];
        let mut w = Writer::new(&mut buff);
        w.varint(1, 9).unwrap();
        w.bytes(2, &long).unwrap();
        let n = w.finish();

        let (f, _) = FailureResp::decode_owned(&buff[..n]).unwrap();
        assert_eq!(f.failure_code(), Some(FailureCode::ProcessError));
        assert_eq!(f.message.len(), MAX_FAILURE_MESSAGE_LEN);
    }
}
