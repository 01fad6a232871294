// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trezor Nostr API Library (and CLI)
//!
//! Host side support for fetching x-only public keys from, and signing
//! 32-byte hashes with, Trezor hardware wallets over the USB HID wire
//! protocol.
//!
//! Layers, from the bottom up:
//! - [transport] moves 64-byte HID reports to and from devices
//! - [framer] splits and re-assembles wire messages over reports
//! - [exchange] drives request / button confirmation / response rounds
//! - [session] tracks open devices and their states
//! - [provider] exposes the device operations to applications
//!
//! ```no_run
//! use trezor_nostr::{hid_provider, proto::prelude::DerivationPath, ExchangeConfig};
//!
//! # fn main() -> Result<(), trezor_nostr::Error> {
//! let p = hid_provider(ExchangeConfig::default())?;
//!
//! let devices = p.enumerate_devices()?;
//! let id = &devices[0].device_id;
//!
//! p.open_device(id)?;
//! let key = p.get_public_key(id, &DerivationPath::nostr(), false)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub use config::ExchangeConfig;

mod error;
pub use error::{CommError, Error};

pub mod exchange;
pub mod framer;

pub mod provider;
pub use provider::{hid_provider, AsyncProvider, Provider, TrezorProvider};

pub mod session;
pub use session::{DeviceState, SessionInfo};

/// Re-export transports for consumer use
pub mod transport;
pub use transport::{Backend, DeviceInfo, DeviceType, Transport};

/// Re-export `trezor-nostr-proto` for consumers
pub use trezor_nostr_proto::{self as proto};
