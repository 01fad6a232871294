// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Open device sessions
//!
//! The [SessionTable] maps device identifiers to [Session]s. The table lock
//! is only held for lookups and inserts, each session carries its own link
//! lock (held for the duration of an exchange) and short-lived state locks,
//! so operations on distinct devices never contend and state queries never
//! block behind an in-flight exchange.
//!
//! Opens are serialised per device identifier, and a closed session keeps
//! its identifier reserved until the in-flight exchange releases the
//! transport, so at most one transport exists per device at any time.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use trezor_nostr_proto::button::ButtonRequestResp;

use crate::{
    exchange::{exchange, ExchangeOutcome},
    framer::WireMessage,
    transport::Transport,
    Error, ExchangeConfig,
};

/// Device session state
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum DeviceState {
    /// Device not open
    Disconnected,
    /// Device open, not yet initialised
    Connected,
    /// Device ready for operations
    Ready,
    /// Device awaiting user interaction
    Busy,
}

/// Descriptive session information
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionInfo {
    pub device_id: String,
    pub state: DeviceState,
    pub label: Option<String>,
    pub firmware_version: Option<String>,
    pub initialized: bool,
    pub pin_protection: bool,
    pub passphrase_protection: bool,
}

/// Session descriptive fields, updated from device features
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionDetails {
    pub label: Option<String>,
    pub firmware_version: Option<String>,
    pub initialized: bool,
    pub pin_protection: bool,
    pub passphrase_protection: bool,
}

/// Open device session
pub struct Session<T: Transport> {
    device_id: String,
    /// Transport, locked for the duration of an exchange and released on close
    link: Mutex<Option<T>>,
    state: Mutex<DeviceState>,
    details: Mutex<SessionDetails>,
    /// Token for the in-flight exchange
    cancel: Mutex<CancellationToken>,
    closed: AtomicBool,
}

/// Settles session state on drop, including on early return or panic
struct StateGuard<'a> {
    state: &'a Mutex<DeviceState>,
    settle: DeviceState,
}

impl<'a> Drop for StateGuard<'a> {
    fn drop(&mut self) {
        *self.state.lock() = self.settle;
    }
}

/// Exclusive link to a device for the duration of [Session::with_link]
pub struct Link<'a, T: Transport> {
    transport: &'a mut T,
    state: &'a Mutex<DeviceState>,
    cancel: CancellationToken,
    cfg: &'a ExchangeConfig,
}

impl<'a, T: Transport> Link<'a, T> {
    /// Execute an exchange, marking the session [DeviceState::Busy] while
    /// awaiting button confirmation
    pub fn exchange(&mut self, req: &WireMessage) -> Result<ExchangeOutcome, Error> {
        let state = self.state;
        exchange(&mut *self.transport, req, self.cfg, &self.cancel, |_b: &ButtonRequestResp| {
            *state.lock() = DeviceState::Busy;
        })
    }
}

impl<T: Transport> Session<T> {
    fn new(device_id: &str, transport: T) -> Self {
        Self {
            device_id: device_id.to_string(),
            link: Mutex::new(Some(transport)),
            state: Mutex::new(DeviceState::Connected),
            details: Mutex::new(SessionDetails::default()),
            cancel: Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Device identifier for this session
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Fetch current state, never blocks on an in-flight exchange
    pub fn state(&self) -> DeviceState {
        match self.closed.load(Ordering::SeqCst) {
            true => DeviceState::Disconnected,
            false => *self.state.lock(),
        }
    }

    /// Snapshot descriptive session information
    pub fn info(&self) -> SessionInfo {
        let d = self.details.lock().clone();

        SessionInfo {
            device_id: self.device_id.clone(),
            state: self.state(),
            label: d.label,
            firmware_version: d.firmware_version,
            initialized: d.initialized,
            pin_protection: d.pin_protection,
            passphrase_protection: d.passphrase_protection,
        }
    }

    /// Update descriptive session information
    pub fn set_details(&self, details: SessionDetails) {
        *self.details.lock() = details;
    }

    /// Cancel any in-flight exchange
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Acquire the link and execute `f`, settling state on completion
    ///
    /// Same-session callers serialize on the link lock, a caller whose
    /// `cancel` token fires while queued returns [Error::Cancelled] without
    /// touching the device. The state settles to the value returned by
    /// `settle` for the operation result, or `fallback` where `f` does not
    /// return.
    pub fn with_link<R>(
        &self,
        cfg: &ExchangeConfig,
        cancel: &CancellationToken,
        fallback: DeviceState,
        settle: impl FnOnce(&Result<R, Error>) -> DeviceState,
        f: impl FnOnce(&mut Link<T>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut slot = self.acquire(cfg, cancel)?;

        let transport = match slot.as_mut() {
            Some(t) => t,
            None => return Err(Error::Cancelled),
        };

        // Scope cancellation to this exchange, `cancel()` reaches only the link holder
        let cancel = {
            let mut c = self.cancel.lock();
            *c = cancel.child_token();
            c.clone()
        };

        // Closed between acquiring the link and installing the token
        if self.closed.load(Ordering::SeqCst) {
            cancel.cancel();
        }

        let mut guard = StateGuard {
            state: &self.state,
            settle: fallback,
        };

        let r = {
            let mut link = Link {
                transport,
                state: &self.state,
                cancel,
                cfg,
            };
            f(&mut link)
        };

        guard.settle = settle(&r);
        drop(guard);

        // Closed while in-flight, release the transport with the link
        if self.closed.load(Ordering::SeqCst) && slot.take().is_some() {
            debug!("Released transport for {}", self.device_id);
        }

        r
    }

    /// Wait for the link, polling for close or caller cancellation
    fn acquire(
        &self,
        cfg: &ExchangeConfig,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, Option<T>>, Error> {
        loop {
            if self.closed.load(Ordering::SeqCst) || cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if let Some(mut l) = self.link.try_lock_for(cfg.poll_interval()) {
                if self.closed.load(Ordering::SeqCst) {
                    l.take();
                    return Err(Error::Cancelled);
                }
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                return Ok(l);
            }
        }
    }

    /// Mark closed and cancel any in-flight exchange, releasing the
    /// transport where the link is idle
    ///
    /// Returns whether the transport was released.
    fn close(&self) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel();

        match self.link.try_lock() {
            Some(mut l) => {
                l.take();
                true
            }
            None => false,
        }
    }

    /// Wait for the in-flight exchange to finish and release the transport
    fn release(&self) {
        self.link.lock().take();
    }
}

/// Table of open sessions by device identifier
pub struct SessionTable<T: Transport> {
    sessions: Mutex<HashMap<String, Arc<Session<T>>>>,
    /// Per-device gates serialising opens
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Closed sessions with an exchange still holding the transport
    retired: Mutex<HashMap<String, Weak<Session<T>>>>,
}

impl<T: Transport> Default for SessionTable<T> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Transport> SessionTable<T> {
    /// Create an empty session table
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch an open session
    pub fn get(&self, device_id: &str) -> Option<Arc<Session<T>>> {
        self.sessions.lock().get(device_id).cloned()
    }

    /// Fetch an open session, failing with [Error::DeviceNotFound]
    pub fn require(&self, device_id: &str) -> Result<Arc<Session<T>>, Error> {
        self.get(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))
    }

    /// Open a session, calling `open` for the transport and `init` on the
    /// new session
    ///
    /// Concurrent opens for the same device wait on the first, which alone
    /// calls `open` and `init`. Where a closed session for the device is
    /// still in-flight its transport is released before `open` is called.
    /// Returns the session and whether it was newly created.
    pub fn open(
        &self,
        device_id: &str,
        open: impl FnOnce() -> Result<T, Error>,
        init: impl FnOnce(&Session<T>),
    ) -> Result<(Arc<Session<T>>, bool), Error> {
        let gate = self
            .gates
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone();
        let _g = gate.lock();

        if let Some(s) = self.get(device_id) {
            debug!("Session for {} already open", device_id);
            return Ok((s, false));
        }

        let retired = self.retired.lock().remove(device_id);
        if let Some(old) = retired.and_then(|w| w.upgrade()) {
            debug!("Awaiting release of closed session for {}", device_id);
            old.release();
        }

        let s = Arc::new(Session::new(device_id, open()?));
        self.sessions
            .lock()
            .insert(device_id.to_string(), s.clone());

        info!("Opened session for {}", device_id);

        init(&s);

        Ok((s, true))
    }

    /// Remove a session, cancelling any in-flight exchange
    ///
    /// The transport is released immediately where the link is idle,
    /// otherwise once the in-flight exchange returns.
    pub fn remove(&self, device_id: &str) -> Option<Arc<Session<T>>> {
        let s = self.sessions.lock().remove(device_id);

        if let Some(s) = &s {
            if !s.close() {
                self.retired
                    .lock()
                    .insert(device_id.to_string(), Arc::downgrade(s));
            }
            info!("Closed session for {}", device_id);
        }

        s
    }

    /// Fetch session state, [DeviceState::Disconnected] for unknown devices
    pub fn state(&self, device_id: &str) -> DeviceState {
        match self.get(device_id) {
            Some(s) => s.state(),
            None => DeviceState::Disconnected,
        }
    }

    /// Cancel any in-flight exchange for a device
    pub fn cancel(&self, device_id: &str) {
        if let Some(s) = self.get(device_id) {
            debug!("Cancelling exchange for {}", device_id);
            s.cancel();
        }
    }

    /// List open device identifiers
    pub fn open_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }
}
