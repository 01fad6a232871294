// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Public key messages, for fetching the secp256k1 public key for a
//! derivation path

use encdec::{DecodeOwned, Encode};

use crate::{
    codec::{FieldReader, Writer},
    helpers::*,
    path::{DerivationPath, PATH_FIELD},
    MessageType, ProtoError, WireStatic,
};

/// Supported elliptic curves
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, strum::Display, strum::EnumString)]
pub enum Curve {
    #[default]
    #[strum(serialize = "secp256k1")]
    Secp256k1,
}

impl Curve {
    /// Curve name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Curve::Secp256k1 => "secp256k1",
        }
    }
}

/// Length of a compressed secp256k1 public key
pub const COMPRESSED_KEY_LEN: usize = 33;

/// Length of an x-only public key
pub const X_ONLY_KEY_LEN: usize = 32;

/// Get public key request
///
/// ## Fields:
/// ```text
/// +-----+---------------+--------------------+
/// | NUM | NAME          | TYPE               |
/// +-----+---------------+--------------------+
/// |   1 | address_n     | repeated varint    |
/// |   2 | ecdsa_curve   | string             |
/// |   3 | show_display  | bool (when set)    |
/// +-----+---------------+--------------------+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct GetPublicKeyReq {
    /// Derivation path
    pub path: DerivationPath,
    /// Curve for key derivation
    pub curve: Curve,
    /// Require on-device confirmation of the key
    pub show_display: bool,
}

mod req_fields {
    pub const CURVE: u32 = 2;
    pub const SHOW_DISPLAY: u32 = 3;
}

impl GetPublicKeyReq {
    /// Create a new secp256k1 [GetPublicKeyReq]
    pub fn new(path: DerivationPath, show_display: bool) -> Self {
        Self {
            path,
            curve: Curve::Secp256k1,
            show_display,
        }
    }
}

impl WireStatic for GetPublicKeyReq {
    const MESSAGE_TYPE: MessageType = MessageType::GetPublicKey;
}

impl Encode for GetPublicKeyReq {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = self.path.encode_len()?;

        let c = self.curve.name();
        n += 2 + c.len();

        if self.show_display {
            n += 2;
        }

        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let index = self.path.encode(buff)?;

        let mut w = Writer::new(&mut buff[index..]);
        w.str(req_fields::CURVE, self.curve.name())?;

        // show_display is omitted rather than sent as false
        if self.show_display {
            w.bool(req_fields::SHOW_DISPLAY, true)?;
        }

        Ok(index + w.finish())
    }
}

impl DecodeOwned for GetPublicKeyReq {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, _) = DerivationPath::decode_owned(buff)?;
        let mut curve = Curve::Secp256k1;
        let mut show_display = false;

        for f in FieldReader::new(buff) {
            let f = f?;

            match f.number {
                PATH_FIELD => (),
                req_fields::CURVE => {
                    let s = f.str().ok_or(ProtoError::InvalidField)??;
                    curve = s.parse().map_err(|_| ProtoError::InvalidValue)?;
                }
                req_fields::SHOW_DISPLAY => show_display = field_bool(&f)?,
                _ => (),
            }
        }

        Ok((
            Self {
                path,
                curve,
                show_display,
            },
            buff.len(),
        ))
    }
}

/// Public key response
///
/// The key is carried within a nested HD node message.
///
/// ## Fields:
/// ```text
/// +-----+-----------------------------------+
/// | NUM | NAME                              |
/// +-----+-----------------------------------+
/// |   1 | node (HDNodeType)                 |
/// |     |   1 depth        varint           |
/// |     |   2 public_key   bytes (33)       |
/// |     |   4 chain_code   bytes (32)       |
/// +-----+-----------------------------------+
/// ```
///
/// The public key is the first node field 2 of exactly [COMPRESSED_KEY_LEN]
/// bytes, field 2 values of other shapes are ignored.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PublicKeyResp {
    /// Depth of the derived node
    pub depth: u32,
    /// Compressed SEC1 public key
    pub public_key: [u8; COMPRESSED_KEY_LEN],
    /// BIP-32 chain code, if provided
    pub chain_code: Option<[u8; 32]>,
}

mod resp_fields {
    pub const NODE: u32 = 1;

    pub const NODE_DEPTH: u32 = 1;
    pub const NODE_PUBLIC_KEY: u32 = 2;
    pub const NODE_CHAIN_CODE: u32 = 4;
}

impl PublicKeyResp {
    /// Create a new [PublicKeyResp] from a compressed public key
    pub fn new(depth: u32, public_key: [u8; COMPRESSED_KEY_LEN]) -> Self {
        Self {
            depth,
            public_key,
            chain_code: None,
        }
    }

    /// Fetch x-only public key (trailing 32 bytes of the compressed key)
    pub fn x_only(&self) -> [u8; X_ONLY_KEY_LEN] {
        let mut k = [0u8; X_ONLY_KEY_LEN];
        k.copy_from_slice(&self.public_key[1..]);
        k
    }

    /// Encode the nested node message
    fn encode_node(&self, buff: &mut [u8]) -> Result<usize, ProtoError> {
        let mut w = Writer::new(buff);

        w.varint(resp_fields::NODE_DEPTH, self.depth as u64)?;
        if let Some(c) = &self.chain_code {
            w.bytes(resp_fields::NODE_CHAIN_CODE, c)?;
        }
        w.bytes(resp_fields::NODE_PUBLIC_KEY, &self.public_key)?;

        Ok(w.finish())
    }

    /// Extract key fields from the nested node message
    fn decode_node(buff: &[u8]) -> Result<Self, ProtoError> {
        let mut depth = 0;
        let mut public_key = None;
        let mut chain_code = None;

        for f in FieldReader::new(buff) {
            let f = f?;

            match f.number {
                resp_fields::NODE_DEPTH => depth = field_u32(&f)?,
                // Field 2 values of any other shape are skipped
                resp_fields::NODE_PUBLIC_KEY if public_key.is_none() => {
                    if let Some(b) = f.bytes().filter(|b| b.len() == COMPRESSED_KEY_LEN) {
                        let mut k = [0u8; COMPRESSED_KEY_LEN];
                        k.copy_from_slice(b);
                        public_key = Some(k);
                    }
                }
                resp_fields::NODE_CHAIN_CODE => {
                    let b = field_bytes(&f)?;
                    chain_code = <[u8; 32]>::try_from(b).ok();
                }
                _ => (),
            }
        }

        let public_key =
            public_key.ok_or(ProtoError::FieldMissing(resp_fields::NODE_PUBLIC_KEY))?;

        Ok(Self {
            depth,
            public_key,
            chain_code,
        })
    }
}

impl WireStatic for PublicKeyResp {
    const MESSAGE_TYPE: MessageType = MessageType::PublicKey;
}

impl Encode for PublicKeyResp {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut node = [0u8; 96];
        let n = self.encode_node(&mut node)?;
        Ok(1 + crate::codec::varint_len(n as u64) + n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut node = [0u8; 96];
        let n = self.encode_node(&mut node)?;

        let mut w = Writer::new(buff);
        w.bytes(resp_fields::NODE, &node[..n])?;

        Ok(w.finish())
    }
}

impl DecodeOwned for PublicKeyResp {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        // Other top-level fields (xpub, root fingerprint) are skipped
        for f in FieldReader::new(buff) {
            let f = f?;

            if f.number == resp_fields::NODE {
                let node = field_bytes(&f)?;
                return Ok((Self::decode_node(node)?, buff.len()));
            }
        }

        Err(ProtoError::FieldMissing(resp_fields::NODE))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_message;

    fn test_key() -> [u8; 33] {
        let mut k = [0u8; 33];
        k[0] = 0x02;
        for (i, b) in k[1..].iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        k
    }

    #[test]
    fn get_public_key_req_encoding() {
        let r = GetPublicKeyReq::new(DerivationPath::new(&[0x8000_002c, 1]).unwrap(), true);

        let mut buff = [0u8; 64];
        let n = r.encode(&mut buff).unwrap();

        let mut expected = vec![0x08, 0xac, 0x80, 0x80, 0x80, 0x08, 0x08, 0x01, 0x12, 9];
        expected.extend_from_slice(b"secp256k1");
        expected.extend_from_slice(&[0x18, 0x01]);

        assert_eq!(&buff[..n], &expected[..]);
        assert_eq!(r.encode_len().unwrap(), n);
    }

    #[test]
    fn get_public_key_req_no_display() {
        let r = GetPublicKeyReq::new(DerivationPath::nostr(), false);

        let mut buff = [0u8; 64];
        let n = encode_decode_message(&mut buff, &r);

        // No show_display field when not confirming
        assert_eq!(&buff[n - 11..n], b"\x12\x09secp256k1");
    }

    #[test]
    fn get_public_key_req_roundtrip() {
        let r = GetPublicKeyReq::new(DerivationPath::nostr(), true);

        let mut buff = [0u8; 64];
        encode_decode_message(&mut buff, &r);
    }

    #[test]
    fn public_key_resp_roundtrip() {
        let mut r = PublicKeyResp::new(5, test_key());
        r.chain_code = Some([0xcc; 32]);

        let mut buff = [0u8; 128];
        encode_decode_message(&mut buff, &r);
    }

    #[test]
    fn public_key_x_only() {
        let r = PublicKeyResp::new(5, test_key());
        assert_eq!(&r.x_only()[..], &test_key()[1..]);
    }

    #[test]
    fn public_key_skips_fields() {
        // Node with extra fields ahead of the key, followed by an xpub string
        let mut node = [0u8; 128];
        let mut w = Writer::new(&mut node);
        w.varint(1, 5).unwrap();
        w.varint(3, 0x1234_5678).unwrap();
        w.bytes(4, &[0xcc; 32]).unwrap();
        w.bytes(2, &test_key()).unwrap();
        let n = w.finish();

        let mut buff = [0u8; 256];
        let mut w = Writer::new(&mut buff);
        w.bytes(1, &node[..n]).unwrap();
        w.str(2, "xpub6ABCDEF").unwrap();
        let m = w.finish();

        let (r, _) = PublicKeyResp::decode_owned(&buff[..m]).unwrap();
        assert_eq!(r.x_only(), <[u8; 32]>::try_from(&test_key()[1..]).unwrap());
        assert_eq!(r.depth, 5);
    }

    #[test]
    fn public_key_missing_node() {
        let b = [0x12, 0x02, b'x', b'y'];
        assert_eq!(
            PublicKeyResp::decode_owned(&b),
            Err(ProtoError::FieldMissing(1))
        );
    }

    #[test]
    fn public_key_missing_key() {
        // Node with depth only
        let b = [0x0a, 0x02, 0x08, 0x01];
        assert_eq!(
            PublicKeyResp::decode_owned(&b),
            Err(ProtoError::FieldMissing(2))
        );
    }

    #[test]
    fn public_key_wrong_length() {
        let mut node = [0u8; 64];
        let mut w = Writer::new(&mut node);
        w.bytes(2, &[0x02; 32]).unwrap();
        let n = w.finish();

        let mut buff = [0u8; 128];
        let mut w = Writer::new(&mut buff);
        w.bytes(1, &node[..n]).unwrap();
        let m = w.finish();

        assert_eq!(
            PublicKeyResp::decode_owned(&buff[..m]),
            Err(ProtoError::FieldMissing(2))
        );
    }
}
