// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP-32 style derivation paths
//!
//! Paths are written as `m` followed by `/` separated decimal components,
//! each optionally suffixed with `'`, `h` or `H` to mark the component as
//! hardened (`index | 0x8000_0000`). On the wire each component is written as
//! a repeated varint field 1.
//!
//! ## Encoding:
//! ```text
//! +------+-----------------+------+-----------------+-----
//! | 0x08 | COMPONENT_0 (v) | 0x08 | COMPONENT_1 (v) | ...
//! +------+-----------------+------+-----------------+-----
//! ```

use core::{fmt::Display, str::FromStr};

use encdec::{DecodeOwned, Encode};
use heapless::Vec;

use crate::{
    codec::{self, FieldReader, FieldValue, WireType},
    ProtoError,
};

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Maximum number of path components
pub const MAX_PATH_COMPONENTS: usize = 10;

/// Wire field number for path components
pub const PATH_FIELD: u32 = 1;

/// Component suffixes marking hardened derivation
const HARDENED_SUFFIXES: &[char] = &['\'', 'h', 'H'];

/// Default path for Nostr keys (NIP-06)
pub const NOSTR_PATH: &str = "m/44'/1237'/0'/0/0";

/// Derivation path parse errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathError {
    /// Path does not begin with `m`
    MissingRoot,
    /// Path contains no components
    Empty,
    /// Component at index is not a valid decimal index
    InvalidComponent(usize),
    /// Component at index does not fit in 31 bits
    Overflow(usize),
    /// Path exceeds the maximum component count
    TooLong,
}

impl Display for PathError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PathError::MissingRoot => write!(f, "path must begin with 'm'"),
            PathError::Empty => write!(f, "path has no components"),
            PathError::InvalidComponent(i) => write!(f, "invalid path component at index {i}"),
            PathError::Overflow(i) => write!(f, "path component at index {i} out of range"),
            PathError::TooLong => write!(f, "path exceeds {MAX_PATH_COMPONENTS} components"),
        }
    }
}

/// Derivation path, up to [MAX_PATH_COMPONENTS] components
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32, MAX_PATH_COMPONENTS>);

impl DerivationPath {
    /// Create a derivation path from raw (already hardened) components
    pub fn new(components: &[u32]) -> Result<Self, PathError> {
        let v = Vec::from_slice(components).map_err(|_| PathError::TooLong)?;
        Ok(Self(v))
    }

    /// Default NIP-06 Nostr path, `m/44'/1237'/0'/0/0`
    pub fn nostr() -> Self {
        let mut v = Vec::new();
        for c in [44 | HARDENED, 1237 | HARDENED, HARDENED, 0, 0] {
            // Capacity exceeds component count
            let _ = v.push(c);
        }
        Self(v)
    }

    /// Parse a derivation path without failing
    ///
    /// Input not starting with `m`, or containing a malformed component,
    /// yields an empty path. Components past [MAX_PATH_COMPONENTS] are
    /// ignored.
    pub fn parse_lenient(s: &str) -> Self {
        let mut v = Vec::new();

        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Self(v);
        }

        for p in parts.take(MAX_PATH_COMPONENTS) {
            match parse_component(p) {
                Some(c) => {
                    let _ = v.push(c);
                }
                None => return Self(Vec::new()),
            }
        }

        Self(v)
    }

    /// Fetch path components
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Number of path components
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the path has no components
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a component to the path
    pub fn push(&mut self, component: u32) -> Result<(), PathError> {
        self.0.push(component).map_err(|_| PathError::TooLong)
    }
}

/// Parse a single path component, returning `None` if malformed or out of range
fn parse_component(s: &str) -> Option<u32> {
    let (digits, hardened) = match s.strip_suffix(HARDENED_SUFFIXES) {
        Some(d) => (d, true),
        None => (s, false),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let index = digits.parse::<u32>().ok()?;
    if index >= HARDENED {
        return None;
    }

    match hardened {
        true => Some(index | HARDENED),
        false => Some(index),
    }
}

impl FromStr for DerivationPath {
    type Err = PathError;

    /// Strictly parse a derivation path
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(PathError::MissingRoot);
        }

        let mut v = Vec::new();
        for (i, p) in parts.enumerate() {
            let (digits, hardened) = match p.strip_suffix(HARDENED_SUFFIXES) {
                Some(d) => (d, true),
                None => (p, false),
            };

            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(PathError::InvalidComponent(i));
            }

            let index = match digits.parse::<u32>() {
                Ok(n) if n < HARDENED => n,
                _ => return Err(PathError::Overflow(i)),
            };

            let c = if hardened { index | HARDENED } else { index };
            v.push(c).map_err(|_| PathError::TooLong)?;
        }

        if v.is_empty() {
            return Err(PathError::Empty);
        }

        Ok(Self(v))
    }
}

impl Display for DerivationPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "m")?;
        for c in self.0.iter() {
            match c & HARDENED != 0 {
                true => write!(f, "/{}'", c & !HARDENED)?,
                false => write!(f, "/{c}")?,
            }
        }
        Ok(())
    }
}

impl Encode for DerivationPath {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let n = self
            .0
            .iter()
            .map(|c| codec::field_len(PATH_FIELD, &FieldValue::Varint(*c as u64)))
            .sum();
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = 0;
        for c in self.0.iter() {
            index += codec::write_field(&mut buff[index..], PATH_FIELD, FieldValue::Varint(*c as u64))?;
        }
        Ok(index)
    }
}

impl DecodeOwned for DerivationPath {
    type Output = Self;
    type Error = ProtoError;

    /// Collect path components from a message, skipping other fields
    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut p = DerivationPath::default();
        let mut r = FieldReader::new(buff);

        for f in &mut r {
            let f = f?;
            if f.number != PATH_FIELD {
                continue;
            }

            if f.value.wire_type() != WireType::Varint {
                return Err(ProtoError::InvalidField);
            }

            let c = f.varint32().ok_or(ProtoError::InvalidField)??;
            p.0.push(c).map_err(|_| ProtoError::Capacity)?;
        }

        Ok((p, r.offset()))
    }
}
