// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol definitions for Trezor wire-protocol communication
//!
//! This crate provides the message subset required to fetch Nostr public keys
//! from, and sign 32-byte hashes with, Trezor-class hardware wallets.
//!
//! Messages are encoded using the device's protobuf schema, however rather than
//! pulling in a schema compiler the handful of fields actually exercised are
//! encoded and extracted by hand using the minimal [codec] module. Unknown fields
//! are skipped so responses from newer firmware still decode.
//!
//! Requests implement [encdec::Encode] and responses [encdec::DecodeOwned] (or
//! [encdec::Decode] where they borrow), with [WireStatic] providing the wire
//! message type for each object.

#![cfg_attr(not(test), no_std)]

pub use encdec::{Decode, DecodeOwned, Encode};

pub mod codec;
pub mod path;

pub mod button;
pub mod failure;
pub mod initialize;
pub mod prelude;
pub mod public_key;
pub mod sign_message;

mod error;
pub use error::ProtoError;

mod helpers;

/// Trezor wire message types
///
/// Only the message subset used for key retrieval and signing is supported.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, num_enum::TryFromPrimitive,
)]
#[repr(u16)]
pub enum MessageType {
    /// Reset session and request device [Features](MessageType::Features)
    Initialize = 0,

    /// Operation failed or was cancelled on the device
    Failure = 3,

    /// Request a public key for a derivation path
    GetPublicKey = 11,

    /// Public key response
    PublicKey = 12,

    /// Device feature / identity response
    Features = 17,

    /// Device requires physical confirmation before continuing
    ButtonRequest = 26,

    /// Host acknowledgement of a [ButtonRequest](MessageType::ButtonRequest)
    ButtonAck = 27,

    /// Request a signature over a message
    SignMessage = 38,

    /// Message signature response
    MessageSignature = 40,
}

impl MessageType {
    /// Resolve a message type from its wire value
    pub fn from_wire(v: u16) -> Option<Self> {
        Self::try_from(v).ok()
    }
}

/// Associates a protocol object with its wire [MessageType]
pub trait WireStatic {
    /// Message type used when framing this object
    const MESSAGE_TYPE: MessageType;
}

#[cfg(test)]
pub(crate) mod test {
    use encdec::{Decode, Encode};

    use super::*;

    /// Helper for message encode / decode tests
    pub fn encode_decode_message<'a, M>(buff: &'a mut [u8], msg: &M) -> usize
    where
        M: Encode<Error = ProtoError> + Decode<'a, Output = M, Error = ProtoError> + PartialEq + core::fmt::Debug,
    {
        // Encode message
        let n = msg.encode(buff).expect("encode failed");

        // Check encoded length matches expected length
        let expected_n = msg.encode_len().expect("get length failed");
        assert_eq!(n, expected_n, "encode length mismatch");

        // Decode message
        let buff: &'a [u8] = buff;
        let (decoded, decoded_n) = M::decode(&buff[..n]).expect("decode failed");

        // Check decoded object and length match
        assert_eq!(msg, &decoded);
        assert_eq!(expected_n, decoded_n);

        n
    }

    #[test]
    fn message_type_wire_values() {
        use strum::IntoEnumIterator;

        for t in MessageType::iter() {
            assert_eq!(MessageType::from_wire(t as u16), Some(t));
        }

        assert_eq!(MessageType::from_wire(9999), None);
        assert_eq!(MessageType::ButtonAck as u16, 27);
        assert_eq!(MessageType::MessageSignature as u16, 40);
    }
}
