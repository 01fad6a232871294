// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated Trezor device for exercising the `trezor-nostr` host library
//! without hardware.
//!
//! [SimDevice] implements the device side of the wire protocol for the
//! message subset used by the host (Initialize, GetPublicKey, SignMessage,
//! ButtonAck), including multi-round button confirmation governed by a
//! [ButtonPolicy]. [SimTransport] connects a device to the host framer and
//! [SimBackend] provides device discovery for `TrezorProvider`.
//!
//! Keys are derived deterministically from the configured seed and path,
//! signatures are BIP-340 schnorr over the provided 32-byte hash.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use k256::schnorr::{Signature, SigningKey};
use log::{debug, warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use trezor_nostr::{
    framer::{encode_packets, Direction, Reassembler, WireMessage},
    transport::{
        Backend, DeviceInfo, Transport, TransportError, PACKET_LEN, TREZOR_ONE_PID, TREZOR_VID,
    },
    Error,
};
use trezor_nostr_proto::{prelude::*, Decode, DecodeOwned, Encode};

/// Button request code for public key display
pub const BUTTON_PUBLIC_KEY: u32 = 11;

/// Button request code for message signing (`Other`)
pub const BUTTON_SIGN: u32 = 1;

/// Maximum request payload accepted by the simulator
pub const SIM_RECV_CAPACITY: usize = 4096;

/// Interval a read waits for responses before reporting a timeout
const READ_POLL: Duration = Duration::from_millis(5);

/// Simulated user behaviour for button confirmations
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
pub enum ButtonPolicy {
    /// Approve after the provided number of button rounds (0 skips confirmation)
    Approve { rounds: usize },
    /// Reject at the first confirmation
    Reject,
    /// Never respond to confirmations
    Stall,
}

impl Default for ButtonPolicy {
    fn default() -> Self {
        ButtonPolicy::Approve { rounds: 1 }
    }
}

/// Simulated device configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    /// Seed for key derivation
    pub seed: [u8; 32],
    /// Vendor reported in features
    pub vendor: String,
    /// Firmware version reported in features
    pub version: (u32, u32, u32),
    /// Device label
    pub label: Option<String>,
    /// Whether a PIN is configured
    pub pin_protection: bool,
    /// Button confirmation behaviour
    pub policy: ButtonPolicy,
    /// Whether the device responds to Initialize
    pub features: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: [0x5a; 32],
            vendor: "trezor.io".to_string(),
            version: (1, 12, 1),
            label: Some("Simulated Trezor".to_string()),
            pin_protection: false,
            policy: ButtonPolicy::default(),
            features: true,
        }
    }
}

/// Counters for observing host behaviour
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimStats {
    /// Host message types received, in order
    pub messages: Vec<u16>,
    /// Button requests issued
    pub button_requests: usize,
    /// Button acknowledgements received
    pub button_acks: usize,
    /// Packets written by the host
    pub packets_in: usize,
    /// Packets read by the host
    pub packets_out: usize,
    /// Times the device has been opened
    pub opens: usize,
}

/// Operation awaiting button confirmation
#[derive(Clone, Debug)]
struct Pending {
    code: u32,
    remaining: usize,
    resp: WireMessage,
}

struct State {
    cfg: SimConfig,
    rx: Option<Reassembler>,
    tx: VecDeque<[u8; PACKET_LEN]>,
    pending: Option<Pending>,
    stats: SimStats,
    unplugged: bool,
}

/// Simulated Trezor device
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<State>>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimDevice {
    /// Create a new simulated device
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                cfg,
                rx: None,
                tx: VecDeque::new(),
                pending: None,
                stats: SimStats::default(),
                unplugged: false,
            })),
        }
    }

    /// Create a transport connected to this device
    pub fn transport(&self) -> SimTransport {
        SimTransport {
            state: self.state.clone(),
        }
    }

    /// Fetch a snapshot of device counters
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats.clone()
    }

    /// Update the button confirmation policy
    pub fn set_policy(&self, policy: ButtonPolicy) {
        self.state.lock().cfg.policy = policy;
    }

    /// Queue a raw device to host message, bypassing request handling
    pub fn inject(&self, msg: &WireMessage) {
        self.state
            .lock()
            .tx
            .extend(encode_packets(Direction::DeviceToHost, msg));
    }

    /// Disconnect the device, failing all subsequent transport operations
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
    }

    /// Check whether the device is attached
    pub fn is_attached(&self) -> bool {
        !self.state.lock().unplugged
    }

    /// Fetch the x-only public key for the provided path
    pub fn public_key(&self, path: &DerivationPath) -> [u8; 32] {
        let seed = self.state.lock().cfg.seed;
        x_only(&derive_key(&seed, path))
    }

    /// Verify a signature over a hash with the key for the provided path
    pub fn verify(&self, path: &DerivationPath, hash: &[u8], signature: &[u8; 64]) -> bool {
        let seed = self.state.lock().cfg.seed;
        let key = derive_key(&seed, path);

        let sig = match Signature::try_from(&signature[..]) {
            Ok(v) => v,
            Err(_) => return false,
        };

        key.verifying_key().verify_raw(hash, &sig).is_ok()
    }
}

/// Derive a signing key from a seed and path
///
/// `SHA256(seed || path components (BE) || counter (BE))`, incrementing the
/// counter until a valid scalar results.
fn derive_key(seed: &[u8; 32], path: &DerivationPath) -> SigningKey {
    let mut counter = 0u32;

    loop {
        let mut h = Sha256::new();
        h.update(seed);
        for c in path.components() {
            h.update(c.to_be_bytes());
        }
        h.update(counter.to_be_bytes());

        if let Ok(k) = SigningKey::from_bytes(&h.finalize()) {
            return k;
        }

        counter += 1;
    }
}

fn x_only(key: &SigningKey) -> [u8; 32] {
    let mut b = [0u8; 32];
    b.copy_from_slice(&key.verifying_key().to_bytes());
    b
}

impl State {
    /// Queue a response message
    fn respond(&mut self, msg: &WireMessage) {
        debug!(
            "SIM: responding with type {} ({} bytes)",
            msg.message_type,
            msg.payload.len()
        );
        self.tx
            .extend(encode_packets(Direction::DeviceToHost, msg));
    }

    /// Queue an encoded response object
    fn send<M: Encode<Error = ProtoError> + WireStatic>(&mut self, m: &M) {
        match WireMessage::encode(m) {
            Ok(v) => self.respond(&v),
            Err(e) => warn!("SIM: failed to encode response: {}", e),
        }
    }

    fn failure(&mut self, code: FailureCode, message: &str) {
        self.send(&FailureResp::new(code, message));
    }

    fn button_request(&mut self, code: u32) {
        self.stats.button_requests += 1;
        self.send(&ButtonRequestResp::new(code));
    }

    /// Respond immediately or start button confirmation, per policy
    fn confirm(&mut self, code: u32, resp: WireMessage) {
        let remaining = match self.cfg.policy {
            ButtonPolicy::Approve { rounds: 0 } => {
                self.respond(&resp);
                return;
            }
            ButtonPolicy::Approve { rounds } => rounds - 1,
            ButtonPolicy::Reject | ButtonPolicy::Stall => 0,
        };

        self.pending = Some(Pending {
            code,
            remaining,
            resp,
        });
        self.button_request(code);
    }

    /// Handle a completed host message
    fn handle(&mut self, m: WireMessage) {
        self.stats.messages.push(m.message_type);

        match m.kind() {
            Some(MessageType::Initialize) => {
                self.pending = None;

                if !self.cfg.features {
                    return;
                }

                let mut f = FeaturesResp::new(&self.cfg.vendor, self.cfg.version);
                if let Some(l) = &self.cfg.label {
                    f = f.with_label(l);
                }
                f.pin_protection = self.cfg.pin_protection;

                self.send(&f);
            }
            Some(MessageType::GetPublicKey) => {
                let req = match GetPublicKeyReq::decode_owned(&m.payload) {
                    Ok((r, _)) => r,
                    Err(e) => return self.failure(FailureCode::DataError, &e.to_string()),
                };

                let key = derive_key(&self.cfg.seed, &req.path);

                let mut public_key = [0x02; 33];
                public_key[1..].copy_from_slice(&x_only(&key));

                let resp = match WireMessage::encode(&PublicKeyResp::new(
                    req.path.len() as u32,
                    public_key,
                )) {
                    Ok(v) => v,
                    Err(e) => return self.failure(FailureCode::FirmwareError, &e.to_string()),
                };

                match req.show_display {
                    true => self.confirm(BUTTON_PUBLIC_KEY, resp),
                    false => self.respond(&resp),
                }
            }
            Some(MessageType::SignMessage) => {
                let req = match SignMessageReq::decode(&m.payload) {
                    Ok((r, _)) => r,
                    Err(e) => return self.failure(FailureCode::DataError, &e.to_string()),
                };

                if req.coin_name != NOSTR_COIN || req.message.len() != 32 {
                    return self.failure(FailureCode::DataError, "Invalid Nostr signing request");
                }

                let key = derive_key(&self.cfg.seed, &req.path);
                let sig = match key.sign_raw(req.message, &[0u8; 32]) {
                    Ok(s) => s,
                    Err(_) => return self.failure(FailureCode::ProcessError, "Signing failed"),
                };

                let resp = match WireMessage::encode(&MessageSignatureResp::new(sig.to_bytes())) {
                    Ok(v) => v,
                    Err(e) => return self.failure(FailureCode::FirmwareError, &e.to_string()),
                };

                self.confirm(BUTTON_SIGN, resp);
            }
            Some(MessageType::ButtonAck) => {
                self.stats.button_acks += 1;

                let mut p = match self.pending.take() {
                    Some(p) => p,
                    None => {
                        return self.failure(FailureCode::UnexpectedMessage, "Unexpected message")
                    }
                };

                match self.cfg.policy {
                    ButtonPolicy::Approve { .. } if p.remaining > 0 => {
                        p.remaining -= 1;
                        let code = p.code;
                        self.pending = Some(p);
                        self.button_request(code);
                    }
                    ButtonPolicy::Approve { .. } => self.respond(&p.resp),
                    ButtonPolicy::Reject => self.failure(FailureCode::ActionCancelled, "Cancelled"),
                    ButtonPolicy::Stall => {
                        debug!("SIM: stalling confirmation");
                        self.pending = Some(p);
                    }
                }
            }
            _ => self.failure(FailureCode::UnexpectedMessage, "Unexpected message"),
        }
    }
}

/// Transport connected to a [SimDevice]
pub struct SimTransport {
    state: Arc<Mutex<State>>,
}

impl Transport for SimTransport {
    fn write_packet(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), TransportError> {
        let mut s = self.state.lock();

        if s.unplugged {
            return Err(TransportError::Io("device disconnected".to_string()));
        }

        s.stats.packets_in += 1;

        let mut rx = match s.rx.take() {
            Some(mut r) => {
                r.push(packet);
                r
            }
            None => match Reassembler::start(Direction::HostToDevice, SIM_RECV_CAPACITY, packet) {
                Ok(r) => r,
                Err(e) => {
                    // Devices drop packets they cannot frame
                    warn!("SIM: dropping packet: {}", e);
                    return Ok(());
                }
            },
        };

        match rx.is_complete() {
            true => s.handle(rx.finish()),
            false => s.rx = Some(rx),
        }

        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<[u8; PACKET_LEN], TransportError> {
        for i in 0..2 {
            {
                let mut s = self.state.lock();

                if s.unplugged {
                    return Err(TransportError::Io("device disconnected".to_string()));
                }

                if let Some(p) = s.tx.pop_front() {
                    s.stats.packets_out += 1;
                    return Ok(p);
                }
            }

            if i == 0 {
                std::thread::sleep(timeout.min(READ_POLL));
            }
        }

        Err(TransportError::Timeout)
    }
}

/// Device discovery over a set of [SimDevice]s
#[derive(Default)]
pub struct SimBackend {
    devices: Mutex<Vec<(String, SimDevice)>>,
}

impl SimBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device with the provided identifier
    pub fn add(&self, device_id: &str, device: SimDevice) {
        self.devices.lock().push((device_id.to_string(), device));
    }

    /// Fetch an attached device
    pub fn device(&self, device_id: &str) -> Option<SimDevice> {
        self.devices
            .lock()
            .iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, d)| d.clone())
    }
}

impl Backend for SimBackend {
    type Transport = SimTransport;

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
        let devices = self
            .devices
            .lock()
            .iter()
            .filter(|(_, d)| d.is_attached())
            .enumerate()
            .map(|(i, (id, _))| {
                DeviceInfo::new(
                    id.as_str(),
                    TREZOR_VID,
                    TREZOR_ONE_PID,
                    Some("SatoshiLabs"),
                    Some("TREZOR"),
                    Some(&format!("SIM{i:08}")),
                )
            })
            .collect();

        Ok(devices)
    }

    fn open(&self, device_id: &str) -> Result<Self::Transport, Error> {
        match self.device(device_id) {
            Some(d) if d.is_attached() => {
                d.state.lock().stats.opens += 1;
                Ok(d.transport())
            }
            _ => Err(Error::DeviceNotFound(device_id.to_string())),
        }
    }
}
