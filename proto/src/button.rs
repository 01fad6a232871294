// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Button confirmation messages
//!
//! The device may respond to any request with a [ButtonRequestResp], the host
//! must reply with a [ButtonAckReq] and await the next response while the
//! user confirms (or rejects) the action on the device.

use encdec::{DecodeOwned, Encode};

use crate::{
    codec::{FieldReader, Writer},
    helpers::*,
    MessageType, ProtoError, WireStatic,
};

/// Button request response, the device is waiting for user confirmation
///
/// ## Fields:
/// ```text
/// +-----+-------+---------+
/// | NUM | NAME  | TYPE    |
/// +-----+-------+---------+
/// |   1 | code  | varint  |
/// +-----+-------+---------+
/// ```
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct ButtonRequestResp {
    /// Button request code, describing the pending action
    pub code: Option<u32>,
}

const CODE_FIELD: u32 = 1;

impl ButtonRequestResp {
    pub fn new(code: u32) -> Self {
        Self { code: Some(code) }
    }
}

impl WireStatic for ButtonRequestResp {
    const MESSAGE_TYPE: MessageType = MessageType::ButtonRequest;
}

impl Encode for ButtonRequestResp {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        match self.code {
            Some(c) => Ok(1 + crate::codec::varint_len(c as u64)),
            None => Ok(0),
        }
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut w = Writer::new(buff);
        if let Some(c) = self.code {
            w.varint(CODE_FIELD, c as u64)?;
        }
        Ok(w.finish())
    }
}

impl DecodeOwned for ButtonRequestResp {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut r = Self::default();

        for f in FieldReader::new(buff) {
            let f = f?;
            if f.number == CODE_FIELD {
                r.code = Some(field_u32(&f)?);
            }
        }

        Ok((r, buff.len()))
    }
}

/// Button acknowledgement request, carries no payload
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct ButtonAckReq {}

impl WireStatic for ButtonAckReq {
    const MESSAGE_TYPE: MessageType = MessageType::ButtonAck;
}

impl Encode for ButtonAckReq {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

impl DecodeOwned for ButtonAckReq {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(_buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((Self {}, 0))
    }
}
