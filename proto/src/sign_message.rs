// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Message signing messages, used to sign 32-byte event hashes

use encdec::{Decode, DecodeOwned, Encode};

use crate::{
    codec::{FieldReader, Writer},
    helpers::*,
    path::{DerivationPath, PATH_FIELD},
    MessageType, ProtoError, WireStatic,
};

/// Coin name used for Nostr message signing
pub const NOSTR_COIN: &str = "Nostr";

/// Length of a Schnorr signature
pub const SIGNATURE_LEN: usize = 64;

/// Sign message request
///
/// ## Fields:
/// ```text
/// +-----+-------------+-------------------+
/// | NUM | NAME        | TYPE              |
/// +-----+-------------+-------------------+
/// |   1 | address_n   | repeated varint   |
/// |   2 | message     | bytes             |
/// |   3 | coin_name   | string            |
/// +-----+-------------+-------------------+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct SignMessageReq<'a> {
    /// Derivation path for signing key
    pub path: DerivationPath,
    /// Message to be signed
    pub message: &'a [u8],
    /// Coin name selecting the signing scheme
    pub coin_name: &'a str,
}

mod req_fields {
    pub const MESSAGE: u32 = 2;
    pub const COIN_NAME: u32 = 3;
}

impl<'a> SignMessageReq<'a> {
    /// Create a new Nostr [SignMessageReq]
    pub fn nostr(path: DerivationPath, message: &'a [u8]) -> Self {
        Self {
            path,
            message,
            coin_name: NOSTR_COIN,
        }
    }
}

impl<'a> WireStatic for SignMessageReq<'a> {
    const MESSAGE_TYPE: MessageType = MessageType::SignMessage;
}

impl<'a> Encode for SignMessageReq<'a> {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let n = self.path.encode_len()?
            + crate::codec::field_len(
                req_fields::MESSAGE,
                &crate::codec::FieldValue::Bytes(self.message),
            )
            + crate::codec::field_len(
                req_fields::COIN_NAME,
                &crate::codec::FieldValue::Bytes(self.coin_name.as_bytes()),
            );
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let index = self.path.encode(buff)?;

        let mut w = Writer::new(&mut buff[index..]);
        w.bytes(req_fields::MESSAGE, self.message)?
            .str(req_fields::COIN_NAME, self.coin_name)?;

        Ok(index + w.finish())
    }
}

impl<'a> Decode<'a> for SignMessageReq<'a> {
    type Output = Self;
    type Error = ProtoError;

    fn decode(buff: &'a [u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, _) = DerivationPath::decode_owned(buff)?;
        let mut message = None;
        let mut coin_name = None;

        for f in FieldReader::new(buff) {
            let f = f?;

            match f.number {
                PATH_FIELD => (),
                req_fields::MESSAGE => message = Some(field_bytes(&f)?),
                req_fields::COIN_NAME => {
                    coin_name = Some(f.str().ok_or(ProtoError::InvalidField)??)
                }
                _ => (),
            }
        }

        let r = Self {
            path,
            message: message.ok_or(ProtoError::FieldMissing(req_fields::MESSAGE))?,
            // Devices default to Bitcoin where no coin is specified
            coin_name: coin_name.unwrap_or("Bitcoin"),
        };

        Ok((r, buff.len()))
    }
}

/// Message signature response
///
/// ## Fields:
/// ```text
/// +-----+-------------+-----------------------+
/// | NUM | NAME        | TYPE                  |
/// +-----+-------------+-----------------------+
/// |   1 | address     | string (skipped)      |
/// |   2 | signature   | bytes (>= 64)         |
/// +-----+-------------+-----------------------+
/// ```
///
/// Signature fields longer than [SIGNATURE_LEN] bytes are truncated to the
/// leading 64 bytes.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct MessageSignatureResp {
    /// Schnorr signature
    pub signature: [u8; SIGNATURE_LEN],
}

mod resp_fields {
    pub const SIGNATURE: u32 = 2;
}

impl MessageSignatureResp {
    /// Create a new [MessageSignatureResp]
    pub fn new(signature: [u8; SIGNATURE_LEN]) -> Self {
        Self { signature }
    }
}

impl WireStatic for MessageSignatureResp {
    const MESSAGE_TYPE: MessageType = MessageType::MessageSignature;
}

impl Encode for MessageSignatureResp {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        // Tag, single byte length, signature
        Ok(2 + SIGNATURE_LEN)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut w = Writer::new(buff);
        w.bytes(resp_fields::SIGNATURE, &self.signature)?;
        Ok(w.finish())
    }
}

impl DecodeOwned for MessageSignatureResp {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        for f in FieldReader::new(buff) {
            let f = f?;

            if f.number != resp_fields::SIGNATURE {
                continue;
            }

            // Shorter signature fields are skipped
            if let Some(b) = f.bytes().filter(|b| b.len() >= SIGNATURE_LEN) {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(&b[..SIGNATURE_LEN]);
                return Ok((Self { signature }, buff.len()));
            }
        }

        Err(ProtoError::FieldMissing(resp_fields::SIGNATURE))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_message;

    #[test]
    fn sign_message_req_encoding() {
        let hash = [0xab; 32];
        let r = SignMessageReq::nostr(DerivationPath::new(&[0]).unwrap(), &hash);

        let mut buff = [0u8; 128];
        let n = r.encode(&mut buff).unwrap();

        let mut expected = vec![0x08, 0x00, 0x12, 32];
        expected.extend_from_slice(&hash);
        expected.extend_from_slice(&[0x1a, 5]);
        expected.extend_from_slice(b"Nostr");

        assert_eq!(&buff[..n], &expected[..]);
        assert_eq!(r.encode_len().unwrap(), n);
    }

    #[test]
    fn sign_message_req_roundtrip() {
        let hash = [0x5a; 32];
        let r = SignMessageReq::nostr(DerivationPath::nostr(), &hash);

        let mut buff = [0u8; 128];
        encode_decode_message(&mut buff, &r);
    }

    #[test]
    fn message_signature_roundtrip() {
        let mut signature = [0u8; 64];
        for (i, b) in signature.iter_mut().enumerate() {
            *b = i as u8;
        }

        let mut buff = [0u8; 128];
        encode_decode_message(&mut buff, &MessageSignatureResp::new(signature));
    }

    #[test]
    fn message_signature_long_field() {
        // Address field ahead of a 65 byte recoverable signature
        let mut sig = [0x11u8; 65];
        sig[64] = 0x1f;

        let mut buff = [0u8; 128];
        let mut w = Writer::new(&mut buff);
        w.str(1, "npub1xyz").unwrap();
        w.bytes(2, &sig).unwrap();
        let n = w.finish();

        let (r, _) = MessageSignatureResp::decode_owned(&buff[..n]).unwrap();
        assert_eq!(r.signature, [0x11; 64]);
    }

    #[test]
    fn message_signature_short_field() {
        let mut buff = [0u8; 128];
        let mut w = Writer::new(&mut buff);
        w.bytes(2, &[0u8; 63]).unwrap();
        let n = w.finish();

        assert_eq!(
            MessageSignatureResp::decode_owned(&buff[..n]),
            Err(ProtoError::FieldMissing(2))
        );
    }

    #[test]
    fn message_signature_missing() {
        assert_eq!(
            MessageSignatureResp::decode_owned(&[0x08, 0x01]),
            Err(ProtoError::FieldMissing(2))
        );
    }
}
