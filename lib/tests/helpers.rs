use std::{str::FromStr, sync::Arc, time::Duration};

use log::LevelFilter;
use simplelog::SimpleLogger;

use trezor_nostr::{ExchangeConfig, TrezorProvider};
use trezor_sim::*;

/// Simulated provider type for tests
pub type SimProvider = TrezorProvider<SimBackend>;

/// Setup logging, configured via `LOG_LEVEL`
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Info,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Exchange configuration with short timeouts for tests
pub fn test_config() -> ExchangeConfig {
    ExchangeConfig::default()
        .with_first_read_timeout(Duration::from_secs(5))
        .with_continuation_timeout(Duration::from_secs(1))
        .with_exchange_deadline(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(10))
}

/// Setup a provider with simulated devices for each of the provided configurations,
/// identified as `sim-N`
pub fn setup(
    devices: &[SimConfig],
    cfg: ExchangeConfig,
) -> (Arc<SimProvider>, Vec<SimDevice>) {
    setup_logging();

    let backend = SimBackend::new();
    let mut handles = vec![];

    for (i, c) in devices.iter().enumerate() {
        let d = SimDevice::new(c.clone());
        backend.add(&format!("sim-{i}"), d.clone());
        handles.push(d);
    }

    (Arc::new(TrezorProvider::new(backend, cfg)), handles)
}

/// Poll until `f` returns true or the timeout elapses
#[allow(unused)]
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    false
}
