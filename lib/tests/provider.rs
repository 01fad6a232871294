use k256::schnorr::{Signature, VerifyingKey};

use trezor_nostr::{
    framer::WireMessage,
    proto::prelude::*,
    CommError, DeviceState, DeviceType, Error, Provider,
};
use trezor_sim::*;

mod helpers;
use helpers::*;

const HASH: [u8; 32] = [
    0x5c, 0x83, 0xda, 0x77, 0xaf, 0x1d, 0xec, 0x6d, 0x72, 0x89, 0x83, 0x49, 0x98, 0xad, 0x7a, 0xaf,
    0xbd, 0x9e, 0x21, 0x91, 0x39, 0x6d, 0x75, 0xec, 0x3c, 0xc2, 0x7f, 0x5a, 0x77, 0x22, 0x6f, 0x36,
];

#[test]
fn open_initializes_session() {
    let (p, d) = setup(&[SimConfig::default()], test_config());

    assert_eq!(p.device_type(), DeviceType::TrezorOne);
    assert_eq!(p.device_state("sim-0"), DeviceState::Disconnected);

    let devices = p.enumerate_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_type, DeviceType::TrezorOne);
    assert_eq!(devices[0].firmware_version, None);

    p.open_device("sim-0").unwrap();
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);

    let i = p.session_info("sim-0").unwrap();
    assert_eq!(i.label.as_deref(), Some("Simulated Trezor"));
    assert_eq!(i.firmware_version.as_deref(), Some("1.12.1"));
    assert!(i.initialized);
    assert!(!i.pin_protection);

    // Enumeration reflects open sessions
    let devices = p.enumerate_devices().unwrap();
    assert_eq!(devices[0].state, DeviceState::Ready);
    assert_eq!(devices[0].firmware_version.as_deref(), Some("1.12.1"));

    // Re-opening does not re-initialise
    p.open_device("sim-0").unwrap();
    let s = d[0].stats();
    assert_eq!(s.opens, 1);
    assert_eq!(s.messages, vec![MessageType::Initialize as u16]);
}

#[test]
fn open_without_features() {
    let (p, _d) = setup(
        &[SimConfig {
            features: false,
            ..Default::default()
        }],
        test_config().with_first_read_timeout(std::time::Duration::from_secs(1)),
    );

    // Initialisation failure leaves the session open but not ready
    p.open_device("sim-0").unwrap();
    assert_eq!(p.device_state("sim-0"), DeviceState::Connected);
    assert_eq!(p.session_info("sim-0").unwrap().firmware_version, None);
}

#[test]
fn open_unknown_device() {
    let (p, _d) = setup(&[SimConfig::default()], test_config());

    assert_eq!(
        p.open_device("sim-9"),
        Err(Error::DeviceNotFound("sim-9".to_string()))
    );
}

#[test]
fn public_key_with_confirmation() {
    let (p, d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();

    let path = DerivationPath::nostr();
    let key = p.get_public_key("sim-0", &path, true).unwrap();

    assert_eq!(key, d[0].public_key(&path));
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);

    // Exactly one button round
    let s = d[0].stats();
    assert_eq!(s.button_requests, 1);
    assert_eq!(s.button_acks, 1);
    assert_eq!(
        s.messages,
        vec![
            MessageType::Initialize as u16,
            MessageType::GetPublicKey as u16,
            MessageType::ButtonAck as u16,
        ]
    );
}

#[test]
fn public_key_without_confirmation() {
    let (p, d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();

    let path: DerivationPath = "m/44'/1237'/3'/0/0".parse().unwrap();
    let key = p.get_public_key("sim-0", &path, false).unwrap();

    assert_eq!(key, d[0].public_key(&path));
    assert_eq!(d[0].stats().button_requests, 0);
}

#[test]
fn sign_hash_verifies() {
    let (p, d) = setup(
        &[SimConfig {
            policy: ButtonPolicy::Approve { rounds: 3 },
            ..Default::default()
        }],
        test_config(),
    );
    p.open_device("sim-0").unwrap();

    let path = DerivationPath::nostr();
    let key = p.get_public_key("sim-0", &path, false).unwrap();
    let sig = p.sign_hash("sim-0", &path, &HASH).unwrap();

    assert_eq!(d[0].stats().button_acks, 3);
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);

    // BIP-340 verification against the returned x-only key
    let vk = VerifyingKey::from_bytes(&key).unwrap();
    let s = Signature::try_from(&sig[..]).unwrap();
    vk.verify_raw(&HASH, &s).unwrap();

    assert!(vk.verify_raw(&[0u8; 32], &s).is_err());
}

#[test]
fn sign_hash_rejected() {
    let (p, d) = setup(
        &[SimConfig {
            policy: ButtonPolicy::Reject,
            ..Default::default()
        }],
        test_config(),
    );
    p.open_device("sim-0").unwrap();

    let r = p.sign_hash("sim-0", &DerivationPath::nostr(), &HASH);
    let e = r.unwrap_err();

    assert!(e.is_user_rejection());
    assert!(!e.is_retryable());
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);

    // Subsequent operations proceed once approved
    d[0].set_policy(ButtonPolicy::Approve { rounds: 1 });
    p.sign_hash("sim-0", &DerivationPath::nostr(), &HASH)
        .unwrap();
}

#[test]
fn sign_hash_invalid_inputs() {
    let (p, d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();
    let before = d[0].stats();

    let r = p.sign_hash("sim-0", &DerivationPath::nostr(), &HASH[..31]);
    assert!(matches!(r, Err(Error::Failed(_))));

    let r = p.sign_hash("sim-0", &DerivationPath::default(), &HASH);
    assert!(matches!(r, Err(Error::Failed(_))));

    let r = p.get_public_key("sim-0", &DerivationPath::default(), false);
    assert!(matches!(r, Err(Error::Failed(_))));

    // No device I/O for rejected inputs
    assert_eq!(d[0].stats(), before);

    let r = p.sign_hash("sim-1", &DerivationPath::nostr(), &HASH);
    assert_eq!(r, Err(Error::DeviceNotFound("sim-1".to_string())));
}

#[test]
fn malformed_public_key_response() {
    let (p, d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();

    // Queue a response with a truncated key ahead of the device response
    let mut buff = [0u8; 64];
    let n = {
        let mut w = trezor_nostr::proto::codec::Writer::new(&mut buff);
        w.bytes(1, &[0x08, 0x05, 0x12, 0x02, 0x02, 0xaa]).unwrap();
        w.finish()
    };
    d[0].inject(&WireMessage::new(
        MessageType::PublicKey as u16,
        buff[..n].to_vec(),
    ));

    let r = p.get_public_key("sim-0", &DerivationPath::nostr(), false);
    assert_eq!(
        r,
        Err(Error::Communication(CommError::Malformed(
            ProtoError::FieldMissing(2)
        )))
    );
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);
}

#[test]
fn close_device() {
    let (p, _d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();

    p.close_device("sim-0");
    assert_eq!(p.device_state("sim-0"), DeviceState::Disconnected);
    assert!(p.session_info("sim-0").is_none());

    let r = p.get_public_key("sim-0", &DerivationPath::nostr(), false);
    assert_eq!(r, Err(Error::DeviceNotFound("sim-0".to_string())));

    // Re-open after close
    p.open_device("sim-0").unwrap();
    assert_eq!(p.device_state("sim-0"), DeviceState::Ready);
}

#[test]
fn unplugged_device() {
    let (p, d) = setup(&[SimConfig::default()], test_config());
    p.open_device("sim-0").unwrap();

    d[0].unplug();

    let r = p.get_public_key("sim-0", &DerivationPath::nostr(), false);
    assert!(matches!(
        r,
        Err(Error::Communication(CommError::Write(_)))
    ));
    assert!(r.unwrap_err().is_retryable());

    assert!(p.enumerate_devices().unwrap().is_empty());
}
