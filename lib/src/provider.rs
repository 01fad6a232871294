// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device provider API
//!
//! [Provider] is the capability set exposed to applications, one
//! implementation per device family. [TrezorProvider] implements this over
//! any [Backend], with [AsyncProvider] bridging blocking operations into
//! async contexts.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use trezor_nostr_proto::{
    prelude::*,
    public_key::X_ONLY_KEY_LEN,
    sign_message::SIGNATURE_LEN,
    DecodeOwned,
};

use crate::{
    exchange::expect,
    framer::WireMessage,
    session::{DeviceState, Session, SessionDetails, SessionInfo, SessionTable},
    transport::{Backend, DeviceInfo, DeviceType},
    Error, ExchangeConfig,
};

/// Length of hashes accepted by [Provider::sign_hash]
pub const HASH_LEN: usize = 32;

/// Hardware signing device provider
pub trait Provider: Send + Sync {
    /// Device family served by this provider
    fn device_type(&self) -> DeviceType;

    /// List attached devices, including state for open devices
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, Error>;

    /// Open a device session, no-op where already open
    fn open_device(&self, device_id: &str) -> Result<(), Error>;

    /// Close a device session, cancelling any in-flight operation
    fn close_device(&self, device_id: &str);

    /// Fetch device state, [DeviceState::Disconnected] where not open
    fn device_state(&self, device_id: &str) -> DeviceState;

    /// Fetch the x-only secp256k1 public key for the provided path
    fn get_public_key(
        &self,
        device_id: &str,
        path: &DerivationPath,
        confirm: bool,
    ) -> Result<[u8; X_ONLY_KEY_LEN], Error> {
        self.get_public_key_cancellable(device_id, path, confirm, &CancellationToken::new())
    }

    /// Fetch the x-only secp256k1 public key, aborting with
    /// [Error::Cancelled] where `cancel` fires
    fn get_public_key_cancellable(
        &self,
        device_id: &str,
        path: &DerivationPath,
        confirm: bool,
        cancel: &CancellationToken,
    ) -> Result<[u8; X_ONLY_KEY_LEN], Error>;

    /// Sign a 32-byte hash with the key for the provided path
    fn sign_hash(
        &self,
        device_id: &str,
        path: &DerivationPath,
        hash: &[u8],
    ) -> Result<[u8; SIGNATURE_LEN], Error> {
        self.sign_hash_cancellable(device_id, path, hash, &CancellationToken::new())
    }

    /// Sign a 32-byte hash, aborting with [Error::Cancelled] where `cancel` fires
    fn sign_hash_cancellable(
        &self,
        device_id: &str,
        path: &DerivationPath,
        hash: &[u8],
        cancel: &CancellationToken,
    ) -> Result<[u8; SIGNATURE_LEN], Error>;

    /// Cancel any in-flight operation for a device
    fn cancel(&self, device_id: &str);

    /// Fetch session information for an open device
    fn session_info(&self, device_id: &str) -> Option<SessionInfo>;
}

/// Trezor [Provider] implementation, generic over [Backend]s
pub struct TrezorProvider<B: Backend> {
    backend: B,
    sessions: SessionTable<B::Transport>,
    cfg: ExchangeConfig,
}

#[cfg(feature = "transport_hid")]
impl TrezorProvider<crate::transport::HidBackend> {
    /// Create a HID backed provider
    /// NOTE: only one provider may exist at a time (workaround for global HID context errors on macos/m1)
    pub fn hid(cfg: ExchangeConfig) -> Result<Self, Error> {
        let backend = crate::transport::HidBackend::new()?;
        Ok(Self::new(backend, cfg))
    }
}

impl<B: Backend> TrezorProvider<B> {
    /// Create a provider over the supplied backend
    pub fn new(backend: B, cfg: ExchangeConfig) -> Self {
        Self {
            backend,
            sessions: SessionTable::new(),
            cfg,
        }
    }

    /// Run Initialize on an open session, updating session details
    fn initialize(&self, s: &Session<B::Transport>) -> Result<FeaturesResp, Error> {
        let req = WireMessage::encode(&InitializeReq {})?;

        let f = s.with_link(
            &self.cfg,
            &CancellationToken::new(),
            DeviceState::Connected,
            |r| match r {
                Ok(_) => DeviceState::Ready,
                Err(_) => DeviceState::Connected,
            },
            |l| expect::<FeaturesResp>(l.exchange(&req)?),
        )?;

        let (major, minor, patch) = f.version();
        s.set_details(SessionDetails {
            label: f.label.as_ref().map(|l| l.to_string()),
            firmware_version: Some(format!("{major}.{minor}.{patch}")),
            initialized: f.initialized,
            pin_protection: f.pin_protection,
            passphrase_protection: f.passphrase_protection,
        });

        Ok(f)
    }

    /// Fetch device features, re-initialising the session
    pub fn features(&self, device_id: &str) -> Result<FeaturesResp, Error> {
        let s = self.sessions.require(device_id)?;
        self.initialize(&s)
    }

    /// Execute an operation exchange on an open session, settling to ready
    fn request<M>(
        &self,
        device_id: &str,
        req: &WireMessage,
        cancel: &CancellationToken,
    ) -> Result<M, Error>
    where
        M: DecodeOwned<Output = M, Error = ProtoError> + WireStatic,
    {
        let s = self.sessions.require(device_id)?;

        s.with_link(
            &self.cfg,
            cancel,
            DeviceState::Ready,
            |_| DeviceState::Ready,
            |l| expect::<M>(l.exchange(req)?),
        )
    }
}

/// Check paths are usable for requests
fn check_path(path: &DerivationPath) -> Result<(), Error> {
    match path.is_empty() {
        true => Err(Error::Failed("empty derivation path".to_string())),
        false => Ok(()),
    }
}

impl<B: Backend> Provider for TrezorProvider<B> {
    fn device_type(&self) -> DeviceType {
        DeviceType::TrezorOne
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, Error> {
        let mut devices = self.backend.enumerate()?;

        // Overlay state for open sessions
        for d in devices.iter_mut() {
            if let Some(s) = self.sessions.get(&d.device_id) {
                let i = s.info();
                d.state = i.state;
                d.firmware_version = i.firmware_version;
            }
        }

        debug!("Found {} devices", devices.len());

        Ok(devices)
    }

    fn open_device(&self, device_id: &str) -> Result<(), Error> {
        let (_s, created) = self.sessions.open(
            device_id,
            || self.backend.open(device_id),
            // Initialisation is best-effort, sessions remain connected on failure
            |s| match self.initialize(s) {
                Ok(f) => info!(
                    "Device {} ready (firmware: {}.{}.{}, initialized: {})",
                    device_id, f.major_version, f.minor_version, f.patch_version, f.initialized
                ),
                Err(e) => warn!("Device {} initialization failed: {}", device_id, e),
            },
        )?;

        if !created {
            debug!("Device {} already open", device_id);
        }

        Ok(())
    }

    fn close_device(&self, device_id: &str) {
        self.sessions.remove(device_id);
    }

    fn device_state(&self, device_id: &str) -> DeviceState {
        self.sessions.state(device_id)
    }

    fn get_public_key_cancellable(
        &self,
        device_id: &str,
        path: &DerivationPath,
        confirm: bool,
        cancel: &CancellationToken,
    ) -> Result<[u8; X_ONLY_KEY_LEN], Error> {
        check_path(path)?;

        debug!(
            "Requesting public key for {} (path: {}, confirm: {})",
            device_id, path, confirm
        );

        let req = WireMessage::encode(&GetPublicKeyReq::new(path.clone(), confirm))?;
        let resp = self.request::<PublicKeyResp>(device_id, &req, cancel)?;

        Ok(resp.x_only())
    }

    fn sign_hash_cancellable(
        &self,
        device_id: &str,
        path: &DerivationPath,
        hash: &[u8],
        cancel: &CancellationToken,
    ) -> Result<[u8; SIGNATURE_LEN], Error> {
        if hash.len() != HASH_LEN {
            return Err(Error::Failed(format!(
                "invalid hash length {} (expected {})",
                hash.len(),
                HASH_LEN
            )));
        }
        check_path(path)?;

        debug!("Requesting signature for {} (path: {})", device_id, path);

        let req = WireMessage::encode(&SignMessageReq::nostr(path.clone(), hash))?;
        let resp = self.request::<MessageSignatureResp>(device_id, &req, cancel)?;

        Ok(resp.signature)
    }

    fn cancel(&self, device_id: &str) {
        self.sessions.cancel(device_id);
    }

    fn session_info(&self, device_id: &str) -> Option<SessionInfo> {
        self.sessions.get(device_id).map(|s| s.info())
    }
}

impl<B: Backend> Drop for TrezorProvider<B> {
    fn drop(&mut self) {
        for id in self.sessions.open_ids() {
            self.sessions.remove(&id);
        }
    }
}

/// Build a HID backed provider, [Error::Unsupported] where HID support is not compiled in
pub fn hid_provider(cfg: ExchangeConfig) -> Result<Arc<dyn Provider>, Error> {
    #[cfg(feature = "transport_hid")]
    return Ok(Arc::new(TrezorProvider::hid(cfg)?));

    #[cfg(not(feature = "transport_hid"))]
    {
        let _ = cfg;
        Err(Error::Unsupported)
    }
}

/// Async operations over a shared [Provider]
///
/// Blocking exchanges run on the tokio blocking pool. Cancelling the token,
/// or dropping the returned future, aborts only the operation it was
/// supplied to.
#[async_trait]
pub trait AsyncProvider {
    /// Fetch the x-only public key for the provided path
    async fn get_public_key_async(
        &self,
        device_id: &str,
        path: &DerivationPath,
        confirm: bool,
        cancel: CancellationToken,
    ) -> Result<[u8; X_ONLY_KEY_LEN], Error>;

    /// Sign a 32-byte hash with the key for the provided path
    async fn sign_hash_async(
        &self,
        device_id: &str,
        path: &DerivationPath,
        hash: &[u8],
        cancel: CancellationToken,
    ) -> Result<[u8; SIGNATURE_LEN], Error>;
}

/// Run a blocking provider operation under the caller's cancellation token
async fn run_blocking<P, R, F>(p: &Arc<P>, cancel: CancellationToken, f: F) -> Result<R, Error>
where
    P: Provider + ?Sized + 'static,
    R: Send + 'static,
    F: FnOnce(&P, &CancellationToken) -> Result<R, Error> + Send + 'static,
{
    let op = cancel.child_token();
    let _guard = op.clone().drop_guard();

    let p1 = p.clone();
    let h = tokio::task::spawn_blocking(move || f(&*p1, &op));

    h.await
        .map_err(|e| Error::Failed(format!("operation task failed: {e}")))?
}

#[async_trait]
impl<P: Provider + ?Sized + 'static> AsyncProvider for Arc<P> {
    async fn get_public_key_async(
        &self,
        device_id: &str,
        path: &DerivationPath,
        confirm: bool,
        cancel: CancellationToken,
    ) -> Result<[u8; X_ONLY_KEY_LEN], Error> {
        let (id, path) = (device_id.to_string(), path.clone());

        debug!("Requesting public key for {} (async)", device_id);

        run_blocking(self, cancel, move |p, c| {
            p.get_public_key_cancellable(&id, &path, confirm, c)
        })
        .await
    }

    async fn sign_hash_async(
        &self,
        device_id: &str,
        path: &DerivationPath,
        hash: &[u8],
        cancel: CancellationToken,
    ) -> Result<[u8; SIGNATURE_LEN], Error> {
        let (id, path, hash) = (device_id.to_string(), path.clone(), hash.to_vec());

        debug!("Requesting signature for {} (async)", device_id);

        run_blocking(self, cancel, move |p, c| {
            p.sign_hash_cancellable(&id, &path, &hash, c)
        })
        .await
    }
}
