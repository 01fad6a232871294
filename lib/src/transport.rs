// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Packet transport abstraction for Trezor devices
//!
//! [Transport] moves fixed 64-byte HID reports to and from a single device,
//! [Backend] discovers and opens devices. The HID implementations are
//! available with the `transport_hid` feature, alternative implementations
//! (such as the simulator) plug in via the same traits.

use std::time::Duration;

use serde::Serialize;

use crate::{session::DeviceState, Error};

/// HID report size used for all packets
pub const PACKET_LEN: usize = 64;

/// SatoshiLabs USB vendor ID
pub const TREZOR_VID: u16 = 0x1209;

/// Trezor One product ID
pub const TREZOR_ONE_PID: u16 = 0x53C0;

/// Trezor Model T product ID
pub const TREZOR_T_PID: u16 = 0x53C1;

/// Legacy (pre-2019 firmware) Trezor One vendor ID
pub const TREZOR_LEGACY_VID: u16 = 0x534C;

/// Legacy (pre-2019 firmware) Trezor One product ID
pub const TREZOR_LEGACY_PID: u16 = 0x0001;

/// Transport level packet error
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// No packet arrived within the read window
    #[error("timeout")]
    Timeout,

    /// Underlying device I/O failed
    #[error("I/O error: {0}")]
    Io(String),
}

/// Packet transport for a single open device
pub trait Transport: Send {
    /// Write a single packet to the device
    fn write_packet(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), TransportError>;

    /// Read a single packet from the device, waiting at most `timeout`
    fn read_packet(&mut self, timeout: Duration) -> Result<[u8; PACKET_LEN], TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_packet(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), TransportError> {
        (**self).write_packet(packet)
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<[u8; PACKET_LEN], TransportError> {
        (**self).read_packet(timeout)
    }
}

/// Device discovery and connection backend
pub trait Backend: Send + Sync {
    /// Transport type for opened devices
    type Transport: Transport + 'static;

    /// List attached Trezor devices
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error>;

    /// Open the device with the provided identifier
    fn open(&self, device_id: &str) -> Result<Self::Transport, Error>;
}

/// Trezor device models
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum DeviceType {
    #[strum(serialize = "Trezor One")]
    TrezorOne,
    #[strum(serialize = "Trezor Model T")]
    TrezorT,
    #[strum(serialize = "Unknown")]
    Unknown,
}

impl DeviceType {
    /// Resolve device type from USB vendor and product IDs
    pub fn from_usb(vendor_id: u16, product_id: u16) -> Self {
        match (vendor_id, product_id) {
            (TREZOR_VID, TREZOR_ONE_PID) => DeviceType::TrezorOne,
            (TREZOR_VID, TREZOR_T_PID) => DeviceType::TrezorT,
            (TREZOR_LEGACY_VID, TREZOR_LEGACY_PID) => DeviceType::TrezorOne,
            _ => DeviceType::Unknown,
        }
    }

    /// Check whether this is a supported Trezor model
    pub fn is_trezor(&self) -> bool {
        !matches!(self, DeviceType::Unknown)
    }
}

/// Device information for listing, used by open
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Opaque device identifier (platform HID path)
    pub device_id: String,
    /// Device model
    pub device_type: DeviceType,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Manufacturer string
    pub manufacturer: String,
    /// Product string
    pub product: String,
    /// Serial number, where reported
    pub serial: Option<String>,
    /// Firmware version, available once the device has been opened
    pub firmware_version: Option<String>,
    /// Current device state
    pub state: DeviceState,
    /// Whether PIN entry may be required
    pub needs_pin: bool,
    /// Nostr signing is built into firmware rather than a separate app
    pub has_nostr_app: bool,
}

impl DeviceInfo {
    /// Create device info from USB descriptors, filling default strings
    pub fn new(
        device_id: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        manufacturer: Option<&str>,
        product: Option<&str>,
        serial: Option<&str>,
    ) -> Self {
        let device_type = DeviceType::from_usb(vendor_id, product_id);

        Self {
            device_id: device_id.into(),
            device_type,
            vendor_id,
            product_id,
            manufacturer: manufacturer.unwrap_or("SatoshiLabs").to_string(),
            product: product
                .map(|p| p.to_string())
                .unwrap_or_else(|| device_type.to_string()),
            serial: serial.map(|s| s.to_string()),
            firmware_version: None,
            state: DeviceState::Connected,
            needs_pin: true,
            has_nostr_app: true,
        }
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:16} (USB, {:04x}:{:04x}, {}, {})",
            self.product,
            self.vendor_id,
            self.product_id,
            self.serial.as_deref().unwrap_or("UNKNOWN"),
            self.state,
        )
    }
}

#[cfg(feature = "transport_hid")]
pub use hid::{HidBackend, HidTransport};

#[cfg(feature = "transport_hid")]
mod hid {
    use std::{ffi::CString, time::Duration};

    use hidapi::{HidApi, HidDevice};
    use log::{debug, warn};
    use parking_lot::Mutex;

    use super::*;
    use crate::Error;

    /// hidapi backed [Backend]
    pub struct HidBackend {
        api: Mutex<HidApi>,
    }

    impl HidBackend {
        /// Create a new HID backend
        /// NOTE: only one backend should exist at a time (workaround for global HID context errors on macos/m1)
        pub fn new() -> Result<Self, Error> {
            let api = HidApi::new()?;
            Ok(Self {
                api: Mutex::new(api),
            })
        }
    }

    impl Backend for HidBackend {
        type Transport = HidTransport;

        fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
            let mut api = self.api.lock();

            if let Err(e) = api.refresh_devices() {
                warn!("HID device refresh failed: {}", e);
                return Err(Error::HidInit);
            }

            let devices: Vec<_> = api
                .device_list()
                .filter(|d| DeviceType::from_usb(d.vendor_id(), d.product_id()).is_trezor())
                // The wire protocol uses interface 0 (-1 where unreported)
                .filter(|d| d.interface_number() == 0 || d.interface_number() == -1)
                .map(|d| {
                    DeviceInfo::new(
                        d.path().to_string_lossy(),
                        d.vendor_id(),
                        d.product_id(),
                        d.manufacturer_string(),
                        d.product_string(),
                        d.serial_number(),
                    )
                })
                .collect();

            debug!("Found {} HID devices", devices.len());

            Ok(devices)
        }

        fn open(&self, device_id: &str) -> Result<Self::Transport, Error> {
            let path = CString::new(device_id)
                .map_err(|_| Error::DeviceNotFound(device_id.to_string()))?;

            let api = self.api.lock();
            match api.open_path(&path) {
                Ok(d) => Ok(HidTransport { device: d }),
                Err(e) => {
                    warn!("Failed to open device {}: {}", device_id, e);
                    Err(Error::DeviceNotFound(device_id.to_string()))
                }
            }
        }
    }

    /// hidapi backed [Transport]
    pub struct HidTransport {
        device: HidDevice,
    }

    impl Transport for HidTransport {
        fn write_packet(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), TransportError> {
            // The leading `?` marker is sent as the report id, no 0x00 prefix
            match self.device.write(packet) {
                Ok(_n) => Ok(()),
                Err(e) => Err(TransportError::Io(e.to_string())),
            }
        }

        fn read_packet(&mut self, timeout: Duration) -> Result<[u8; PACKET_LEN], TransportError> {
            let mut buff = [0u8; PACKET_LEN];

            let ms = timeout.as_millis().min(i32::MAX as u128) as i32;

            match self.device.read_timeout(&mut buff, ms) {
                Ok(0) => Err(TransportError::Timeout),
                Ok(_n) => Ok(buff),
                Err(e) => Err(TransportError::Io(e.to_string())),
            }
        }
    }
}
