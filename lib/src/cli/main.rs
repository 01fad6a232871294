// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for Nostr keys and signing with Trezor devices

use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, LevelFilter};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use trezor_nostr::{
    proto::prelude::{DerivationPath, NOSTR_PATH},
    AsyncProvider, ExchangeConfig, Provider, TrezorProvider,
};

mod helpers;
use helpers::*;

/// Trezor Nostr command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Exchange timeouts
    #[clap(flatten)]
    exchange: ExchangeConfig,

    /// Write command output to a JSON file
    #[clap(long)]
    output: Option<String>,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch device features
    Features,

    /// Fetch the x-only Nostr public key
    PublicKey {
        /// Derivation path
        #[clap(long, default_value = NOSTR_PATH, value_parser = parse_path)]
        path: DerivationPath,

        /// Display and confirm the key on the device
        #[clap(long)]
        confirm: bool,
    },

    /// Sign a 32-byte hash (Nostr event id)
    SignHash {
        /// hex-encoded hash to be signed
        #[clap(long)]
        hash: HexData<32>,

        /// Derivation path
        #[clap(long, default_value = NOSTR_PATH, value_parser = parse_path)]
        path: DerivationPath,
    },
}

#[derive(Clone, Debug, Serialize)]
struct PublicKeyOutput {
    path: String,
    public_key: String,
}

#[derive(Clone, Debug, Serialize)]
struct SignatureOutput {
    path: String,
    hash: String,
    signature: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    // Setup provider
    let p = Arc::new(TrezorProvider::hid(args.exchange.clone())?);

    // List available devices
    let devices = p.enumerate_devices()?;
    if devices.is_empty() {
        return Err(anyhow::anyhow!("No devices found"));
    }

    // Handle list command
    if args.cmd == Actions::List {
        info!("Devices:");
        for (i, d) in devices.iter().enumerate() {
            info!("  {}: {}", i, d);
        }

        if let Some(o) = &args.output {
            write_output(o, &devices).await?;
        }

        return Ok(());
    }

    // Select device by index
    if args.device_index >= devices.len() {
        return Err(anyhow::anyhow!(
            "Invalid device index: {} (max: {})",
            args.device_index,
            devices.len() - 1
        ));
    }

    let d = &devices[args.device_index];
    debug!("Using device {}: {}", args.device_index, d);

    // Open device
    if let Err(e) = p.open_device(&d.device_id) {
        error!("Failed to open device: {}", d);
        return Err(e.into());
    }

    // Cancel in-flight exchanges on ctrl+c
    let cancel = CancellationToken::new();
    let c1 = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling operation");
            c1.cancel();
        }
    });

    // Execute command
    let r = execute(&p, &d.device_id, args.cmd, args.output.as_deref(), cancel).await;

    p.close_device(&d.device_id);

    r
}

/// Execute a command on the provided device
async fn execute(
    p: &Arc<TrezorProvider<trezor_nostr::transport::HidBackend>>,
    device_id: &str,
    cmd: Actions,
    output: Option<&str>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    match cmd {
        Actions::Features => {
            let f = p.features(device_id)?;
            debug!("features: {:?}", f);

            let i = p
                .session_info(device_id)
                .ok_or_else(|| anyhow::anyhow!("Device not open"))?;

            info!("vendor: {}", f.vendor);
            info!("label: {}", i.label.as_deref().unwrap_or("NONE"));
            info!("firmware: {}", i.firmware_version.as_deref().unwrap_or("UNKNOWN"));
            info!("initialized: {}", i.initialized);
            info!("pin protection: {}", i.pin_protection);
            info!("passphrase protection: {}", i.passphrase_protection);

            if let Some(o) = output {
                write_output(o, &i).await?;
            }
        }
        Actions::PublicKey { path, confirm } => {
            info!("Requesting public key for path: {}", path);
            if confirm {
                info!("Confirm on device to continue");
            }

            let key = p
                .get_public_key_async(device_id, &path, confirm, cancel)
                .await?;

            info!("public key: {}", hex::encode(key));

            if let Some(o) = output {
                let v = PublicKeyOutput {
                    path: path.to_string(),
                    public_key: hex::encode(key),
                };
                write_output(o, &v).await?;
            }
        }
        Actions::SignHash { hash, path } => {
            info!("Signing hash {} with path: {}", hash, path);
            info!("Confirm on device to continue");

            let sig = p
                .sign_hash_async(device_id, &path, &hash.0, cancel)
                .await?;

            info!("signature: {}", hex::encode(sig));

            if let Some(o) = output {
                let v = SignatureOutput {
                    path: path.to_string(),
                    hash: hash.to_string(),
                    signature: hex::encode(sig),
                };
                write_output(o, &v).await?;
            }
        }
        Actions::List => unreachable!(),
    }

    Ok(())
}
