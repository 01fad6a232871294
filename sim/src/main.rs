// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{str::FromStr, sync::Arc};

use clap::Parser;
use log::{info, LevelFilter};
use sha2::{Digest, Sha256};

use trezor_nostr::{
    proto::prelude::{DerivationPath, NOSTR_PATH},
    ExchangeConfig, Provider, TrezorProvider,
};
use trezor_sim::*;

/// Simulated Trezor demonstration tool
///
/// Runs the host library against an in-process simulated device, fetching
/// a Nostr public key and signing the hash of the provided message.
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// Message to hash and sign
    #[clap(default_value = "hello nostr")]
    message: String,

    /// Hex-encoded device seed
    #[clap(long, env = "SIM_SEED")]
    seed: Option<String>,

    /// Derivation path
    #[clap(long, default_value = NOSTR_PATH)]
    path: String,

    /// Button confirmation rounds before approval
    #[clap(long, default_value = "1")]
    rounds: usize,

    /// Reject confirmations
    #[clap(long)]
    reject: bool,

    #[clap(flatten)]
    exchange: ExchangeConfig,

    /// Log level
    #[clap(long, default_value = "debug")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let _ = simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default());

    let path = DerivationPath::from_str(&args.path)
        .map_err(|e| anyhow::anyhow!("Invalid path '{}': {}", args.path, e))?;

    // Configure simulated device
    let mut cfg = SimConfig {
        policy: match args.reject {
            true => ButtonPolicy::Reject,
            false => ButtonPolicy::Approve {
                rounds: args.rounds,
            },
        },
        ..Default::default()
    };
    if let Some(s) = &args.seed {
        hex::decode_to_slice(s, &mut cfg.seed)?;
    }

    let device = SimDevice::new(cfg);
    let backend = SimBackend::new();
    backend.add("sim-0", device.clone());

    let p = Arc::new(TrezorProvider::new(backend, args.exchange));

    // Discover and open device
    for d in p.enumerate_devices()? {
        info!("Found device: {}", d);
    }

    p.open_device("sim-0")?;
    info!("Device state: {}", p.device_state("sim-0"));

    // Fetch public key with on-device confirmation
    let key = p.get_public_key("sim-0", &path, true)?;
    info!("public key: {}", hex::encode(key));

    // Sign message hash
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(args.message.as_bytes()));
    info!("hash: {}", hex::encode(hash));

    let sig = p.sign_hash("sim-0", &path, &hash)?;
    info!("signature: {}", hex::encode(sig));

    match device.verify(&path, &hash, &sig) {
        true => info!("Signature verified"),
        false => return Err(anyhow::anyhow!("Signature verification failed")),
    }

    info!("Device stats: {:?}", device.stats());

    p.close_device("sim-0");

    Ok(())
}
