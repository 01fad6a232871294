// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Session initialisation messages, for resetting the device session and
//! fetching device features

use encdec::{DecodeOwned, Encode};
use heapless::String;

use crate::{
    codec::{FieldReader, Writer},
    helpers::*,
    MessageType, ProtoError, WireStatic,
};

/// Initialize request, resets the device session
///
/// Carries no payload, the device responds with [FeaturesResp].
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct InitializeReq {}

impl WireStatic for InitializeReq {
    const MESSAGE_TYPE: MessageType = MessageType::Initialize;
}

impl Encode for InitializeReq {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

impl DecodeOwned for InitializeReq {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        // Session id and other optional fields are accepted and ignored
        for f in FieldReader::new(buff) {
            f?;
        }
        Ok((Self {}, buff.len()))
    }
}

/// Maximum stored vendor string length
pub const MAX_VENDOR_LEN: usize = 32;

/// Maximum stored device label length
pub const MAX_LABEL_LEN: usize = 64;

/// Features response, describing device identity and configuration
///
/// Only the fields used by the host are decoded, all others are skipped.
///
/// ## Fields:
/// ```text
/// +-----+------------------------+----------+
/// | NUM | NAME                   | TYPE     |
/// +-----+------------------------+----------+
/// |   1 | vendor                 | string   |
/// |   2 | major_version          | varint   |
/// |   3 | minor_version          | varint   |
/// |   4 | patch_version          | varint   |
/// |   7 | pin_protection         | bool     |
/// |   8 | passphrase_protection  | bool     |
/// |  10 | label                  | string   |
/// |  12 | initialized            | bool     |
/// +-----+------------------------+----------+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct FeaturesResp {
    /// Device vendor
    pub vendor: String<MAX_VENDOR_LEN>,
    /// Firmware major version
    pub major_version: u32,
    /// Firmware minor version
    pub minor_version: u32,
    /// Firmware patch version
    pub patch_version: u32,
    /// Device is PIN protected
    pub pin_protection: bool,
    /// Device uses passphrase protection
    pub passphrase_protection: bool,
    /// User-assigned device label
    pub label: Option<String<MAX_LABEL_LEN>>,
    /// Device holds a seed
    pub initialized: bool,
}

mod fields {
    pub const VENDOR: u32 = 1;
    pub const MAJOR_VERSION: u32 = 2;
    pub const MINOR_VERSION: u32 = 3;
    pub const PATCH_VERSION: u32 = 4;
    pub const PIN_PROTECTION: u32 = 7;
    pub const PASSPHRASE_PROTECTION: u32 = 8;
    pub const LABEL: u32 = 10;
    pub const INITIALIZED: u32 = 12;
}

impl FeaturesResp {
    /// Create a new [FeaturesResp] for an initialized device
    pub fn new(vendor: &str, (major, minor, patch): (u32, u32, u32)) -> Self {
        Self {
            vendor: truncate_str(vendor),
            major_version: major,
            minor_version: minor,
            patch_version: patch,
            initialized: true,
            ..Default::default()
        }
    }

    /// Set the device label
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(truncate_str(label));
        self
    }

    /// Firmware version as a `(major, minor, patch)` tuple
    pub fn version(&self) -> (u32, u32, u32) {
        (self.major_version, self.minor_version, self.patch_version)
    }
}

impl WireStatic for FeaturesResp {
    const MESSAGE_TYPE: MessageType = MessageType::Features;
}

impl Encode for FeaturesResp {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        // Encode into scratch space, features are always small
        let mut buff = [0u8; 256];
        self.encode(&mut buff)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut w = Writer::new(buff);

        if !self.vendor.is_empty() {
            w.str(fields::VENDOR, &self.vendor)?;
        }

        w.varint(fields::MAJOR_VERSION, self.major_version as u64)?
            .varint(fields::MINOR_VERSION, self.minor_version as u64)?
            .varint(fields::PATCH_VERSION, self.patch_version as u64)?
            .bool(fields::PIN_PROTECTION, self.pin_protection)?
            .bool(fields::PASSPHRASE_PROTECTION, self.passphrase_protection)?;

        if let Some(l) = &self.label {
            w.str(fields::LABEL, l)?;
        }

        w.bool(fields::INITIALIZED, self.initialized)?;

        Ok(w.finish())
    }
}

impl DecodeOwned for FeaturesResp {
    type Output = Self;
    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut r = Self::default();

        for f in FieldReader::new(buff) {
            let f = f?;

            match f.number {
                fields::VENDOR => r.vendor = truncated_string(&f)?,
                fields::MAJOR_VERSION => r.major_version = field_u32(&f)?,
                fields::MINOR_VERSION => r.minor_version = field_u32(&f)?,
                fields::PATCH_VERSION => r.patch_version = field_u32(&f)?,
                fields::PIN_PROTECTION => r.pin_protection = field_bool(&f)?,
                fields::PASSPHRASE_PROTECTION => r.passphrase_protection = field_bool(&f)?,
                fields::LABEL => r.label = Some(truncated_string(&f)?),
                fields::INITIALIZED => r.initialized = field_bool(&f)?,
                _ => (),
            }
        }

        Ok((r, buff.len()))
    }
}
