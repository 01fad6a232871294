use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use trezor_nostr::{proto::prelude::DerivationPath, DeviceState, Error, Provider};
use trezor_sim::*;

mod helpers;
use helpers::*;

#[test]
fn stalled_device_does_not_block_others() {
    let (p, d) = setup(
        &[
            SimConfig {
                policy: ButtonPolicy::Stall,
                ..Default::default()
            },
            SimConfig::default(),
        ],
        test_config(),
    );
    p.open_device("sim-0").unwrap();
    p.open_device("sim-1").unwrap();

    // Start an exchange that blocks awaiting confirmation
    let p1 = p.clone();
    let h = thread::spawn(move || p1.get_public_key("sim-0", &DerivationPath::nostr(), true));

    assert!(
        wait_for(Duration::from_secs(2), || p.device_state("sim-0") == DeviceState::Busy),
        "device did not enter busy state"
    );

    // State queries and other devices remain responsive
    let start = Instant::now();
    assert_eq!(p.device_state("sim-0"), DeviceState::Busy);
    assert!(p.session_info("sim-0").is_some());
    let devices = p.enumerate_devices().unwrap();
    assert_eq!(devices[0].state, DeviceState::Busy);

    let key = p
        .get_public_key("sim-1", &DerivationPath::nostr(), true)
        .unwrap();
    assert_eq!(key, d[1].public_key(&DerivationPath::nostr()));
    assert!(start.elapsed() < Duration::from_secs(2));

    // Release the stalled exchange
    p.cancel("sim-0");
    assert_eq!(h.join().unwrap(), Err(Error::Cancelled));
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);
}

#[test]
fn same_device_operations_serialize() {
    let (p, d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let p = p.clone();
            thread::spawn(move || {
                let path: DerivationPath = format!("m/44'/1237'/{i}'/0/0").parse().unwrap();
                let key = p.get_public_key("sim-0", &path, i % 2 == 0).unwrap();
                (path, key)
            })
        })
        .collect();

    for h in handles {
        let (path, key) = h.join().unwrap();
        assert_eq!(key, d[0].public_key(&path));
    }

    let s = d[0].stats();
    assert_eq!(s.button_requests, 2);
    assert_eq!(s.button_acks, 2);
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);
}

#[test]
fn concurrent_open_is_idempotent() {
    let (p, d) = setup(&[SimConfig::default()], test_config());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let p = Arc::clone(&p);
            thread::spawn(move || p.open_device("sim-0"))
        })
        .collect();

    for h in handles {
        h.join().unwrap().unwrap();
    }

    assert!(wait_for(Duration::from_secs(2), || {
        p.device_state("sim-0") == DeviceState::Ready
    }));

    // A single transport is opened and initialised
    let s = d[0].stats();
    assert_eq!(s.opens, 1);
    assert_eq!(s.messages.len(), 1);
}

#[test]
fn reopen_after_close_in_flight() {
    let (p, d) = setup(
        &[SimConfig {
            policy: ButtonPolicy::Stall,
            ..Default::default()
        }],
        test_config(),
    );
    p.open_device("sim-0").unwrap();

    let p1 = p.clone();
    let h = thread::spawn(move || p1.get_public_key("sim-0", &DerivationPath::nostr(), true));

    assert!(wait_for(Duration::from_secs(2), || {
        p.device_state("sim-0") == DeviceState::Busy
    }));

    p.close_device("sim-0");
    p.open_device("sim-0").unwrap();

    assert_eq!(h.join().unwrap(), Err(Error::Cancelled));
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);
    assert_eq!(d[0].stats().opens, 2);
}
