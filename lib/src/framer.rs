// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wire message framing over 64-byte HID reports
//!
//! Messages are split into a first packet carrying the header and as much
//! payload as fits, followed by continuation packets as required. Layouts
//! differ by direction:
//!
//! ## Host to device:
//! ```text
//! first:        [0x3F] ['#'] ['#'] [TYPE (BE16)] [LEN (BE32)] [PAYLOAD <= 55]
//! continuation: [0x3F] [PAYLOAD <= 63]
//! ```
//!
//! ## Device to host:
//! ```text
//! first:        ['#'] ['#'] [TYPE (BE16)] [LEN (BE32)] [PAYLOAD <= 56]
//! continuation: [MARKER] [PAYLOAD <= 63]
//! ```
//!
//! All packets are zero padded to [PACKET_LEN].

use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use trezor_nostr_proto::{DecodeOwned, Encode, MessageType, ProtoError, WireStatic};

use crate::{
    transport::{Transport, TransportError, PACKET_LEN},
    CommError, Error, ExchangeConfig,
};

/// HID report ID / continuation marker
pub const REPORT_ID: u8 = 0x3F;

/// Message header magic
pub const MAGIC: [u8; 2] = *b"##";

/// Framing direction
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum Direction {
    /// Host to device, first packets prefixed by report ID
    HostToDevice,
    /// Device to host
    DeviceToHost,
}

impl Direction {
    /// Offset of the `##` magic in the first packet
    const fn magic_offset(&self) -> usize {
        match self {
            Direction::HostToDevice => 1,
            Direction::DeviceToHost => 0,
        }
    }

    /// Length of the first packet header
    pub const fn header_len(&self) -> usize {
        self.magic_offset() + 8
    }

    /// Payload capacity of the first packet
    pub const fn first_payload_len(&self) -> usize {
        PACKET_LEN - self.header_len()
    }

    /// Payload capacity of continuation packets
    pub const fn continuation_payload_len(&self) -> usize {
        PACKET_LEN - 1
    }
}

/// Wire message, a type code and encoded payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    pub message_type: u16,
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Create a wire message from a raw type code and payload
    pub fn new(message_type: u16, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Encode a protocol object into a wire message
    pub fn encode<M: Encode<Error = ProtoError> + WireStatic>(m: &M) -> Result<Self, ProtoError> {
        let n = m.encode_len()?;

        let mut payload = vec![0u8; n];
        let n = m.encode(&mut payload)?;
        payload.truncate(n);

        Ok(Self::new(M::MESSAGE_TYPE as u16, payload))
    }

    /// Decode the payload as a protocol object
    ///
    /// Fails with [CommError::UnexpectedResponse] where the message type does not match.
    pub fn decode<M>(&self) -> Result<M, CommError>
    where
        M: DecodeOwned<Output = M, Error = ProtoError> + WireStatic,
    {
        if self.message_type != M::MESSAGE_TYPE as u16 {
            return Err(CommError::UnexpectedResponse(self.message_type));
        }

        M::decode_owned(&self.payload)
            .map(|(m, _n)| m)
            .map_err(CommError::Malformed)
    }

    /// Resolve the message type, if known
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_wire(self.message_type)
    }

    /// Check whether the message is of the provided type
    pub fn is(&self, t: MessageType) -> bool {
        self.message_type == t as u16
    }
}

/// Split a message into packets for the provided direction
pub fn encode_packets(dir: Direction, msg: &WireMessage) -> Vec<[u8; PACKET_LEN]> {
    let mut packets = vec![];

    // Write first packet header
    let mut p = [0u8; PACKET_LEN];
    let o = dir.magic_offset();
    if dir == Direction::HostToDevice {
        p[0] = REPORT_ID;
    }
    p[o..][..2].copy_from_slice(&MAGIC);
    BigEndian::write_u16(&mut p[o + 2..], msg.message_type);
    BigEndian::write_u32(&mut p[o + 4..], msg.payload.len() as u32);

    let n = msg.payload.len().min(dir.first_payload_len());
    p[dir.header_len()..][..n].copy_from_slice(&msg.payload[..n]);
    packets.push(p);

    // Write continuation packets
    for chunk in msg.payload[n..].chunks(dir.continuation_payload_len()) {
        let mut p = [0u8; PACKET_LEN];
        p[0] = REPORT_ID;
        p[1..][..chunk.len()].copy_from_slice(chunk);
        packets.push(p);
    }

    packets
}

/// Message re-assembly from received packets
#[derive(Clone, Debug)]
pub struct Reassembler {
    dir: Direction,
    message_type: u16,
    expected: usize,
    payload: Vec<u8>,
}

impl Reassembler {
    /// Start re-assembly from the first packet of a message
    ///
    /// Fails where the magic is invalid or the declared length exceeds `capacity`.
    pub fn start(dir: Direction, capacity: usize, p: &[u8; PACKET_LEN]) -> Result<Self, CommError> {
        let o = dir.magic_offset();

        if dir == Direction::HostToDevice && p[0] != REPORT_ID {
            return Err(CommError::InvalidMagic);
        }
        if p[o..][..2] != MAGIC {
            return Err(CommError::InvalidMagic);
        }

        let message_type = BigEndian::read_u16(&p[o + 2..]);
        let expected = BigEndian::read_u32(&p[o + 4..]) as usize;

        if expected > capacity {
            return Err(CommError::ResponseTooLarge(expected));
        }

        let n = expected.min(dir.first_payload_len());
        let mut payload = Vec::with_capacity(expected);
        payload.extend_from_slice(&p[dir.header_len()..][..n]);

        Ok(Self {
            dir,
            message_type,
            expected,
            payload,
        })
    }

    /// Check whether all payload bytes have been received
    pub fn is_complete(&self) -> bool {
        self.payload.len() >= self.expected
    }

    /// Append a continuation packet, the marker byte is not checked
    pub fn push(&mut self, p: &[u8; PACKET_LEN]) {
        let remaining = self.expected - self.payload.len();
        let n = remaining.min(self.dir.continuation_payload_len());
        self.payload.extend_from_slice(&p[1..][..n]);
    }

    /// Complete re-assembly, returning the message
    pub fn finish(self) -> WireMessage {
        WireMessage::new(self.message_type, self.payload)
    }
}

/// Context for reads within an exchange
pub struct ReadContext<'a> {
    pub cfg: &'a ExchangeConfig,
    pub cancel: &'a CancellationToken,
    pub deadline: Instant,
}

/// Sliced read failure
#[derive(Clone, Debug, PartialEq)]
enum SliceError {
    Timeout,
    Deadline,
    Cancelled,
    Io(String),
}

/// Read a packet within `timeout`, in slices of the configured poll interval
/// so cancellation and the exchange deadline are observed
fn read_sliced<T: Transport + ?Sized>(
    t: &mut T,
    timeout: Duration,
    ctx: &ReadContext,
) -> Result<[u8; PACKET_LEN], SliceError> {
    let window_end = Instant::now() + timeout;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(SliceError::Cancelled);
        }

        let now = Instant::now();
        if now >= ctx.deadline {
            return Err(SliceError::Deadline);
        }
        if now >= window_end {
            return Err(SliceError::Timeout);
        }

        let slice = ctx
            .cfg
            .poll_interval()
            .min(window_end - now)
            .min(ctx.deadline - now);

        match t.read_packet(slice) {
            Ok(p) => return Ok(p),
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Io(e)) => return Err(SliceError::Io(e)),
        }
    }
}

/// Write a message to the device
pub fn write_message<T: Transport + ?Sized>(
    t: &mut T,
    msg: &WireMessage,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let packets = encode_packets(Direction::HostToDevice, msg);

    debug!(
        "Sending message type {} ({} bytes, {} packets)",
        msg.message_type,
        msg.payload.len(),
        packets.len()
    );

    for p in packets.iter() {
        trace!("TX: {}", hex::encode(p));

        t.write_packet(p)
            .map_err(|e| Error::Communication(CommError::Write(e.to_string())))?;
    }

    Ok(())
}

/// Read a message from the device
pub fn read_message<T: Transport + ?Sized>(
    t: &mut T,
    ctx: &ReadContext,
) -> Result<WireMessage, Error> {
    // Read first packet
    let p = match read_sliced(t, ctx.cfg.first_read_timeout(), ctx) {
        Ok(p) => p,
        Err(SliceError::Timeout) | Err(SliceError::Deadline) => return Err(Error::Timeout),
        Err(SliceError::Cancelled) => return Err(Error::Cancelled),
        Err(SliceError::Io(e)) => return Err(Error::Communication(CommError::Read(e))),
    };

    trace!("RX: {}", hex::encode(p));

    let mut r = Reassembler::start(Direction::DeviceToHost, ctx.cfg.recv_capacity, &p)?;

    // Read continuation packets
    while !r.is_complete() {
        let p = match read_sliced(t, ctx.cfg.continuation_timeout(), ctx) {
            Ok(p) => p,
            Err(SliceError::Cancelled) => return Err(Error::Cancelled),
            Err(SliceError::Deadline) => return Err(Error::Timeout),
            Err(SliceError::Timeout) | Err(SliceError::Io(_)) => {
                return Err(Error::Communication(CommError::ContinuationRead))
            }
        };

        trace!("RX: {}", hex::encode(p));

        r.push(&p);
    }

    let m = r.finish();

    debug!(
        "Received message type {} ({} bytes)",
        m.message_type,
        m.payload.len()
    );

    Ok(m)
}

#[cfg(test)]
pub(crate) mod test {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;

    /// Scripted transport for framer and exchange tests
    #[derive(Default)]
    pub struct ScriptTransport {
        pub written: Vec<[u8; PACKET_LEN]>,
        pub reads: VecDeque<Result<[u8; PACKET_LEN], TransportError>>,
        pub read_count: usize,
    }

    impl ScriptTransport {
        /// Queue a device to host message
        pub fn queue(&mut self, msg: &WireMessage) {
            for p in encode_packets(Direction::DeviceToHost, msg) {
                self.reads.push_back(Ok(p));
            }
        }
    }

    impl Transport for ScriptTransport {
        fn write_packet(&mut self, packet: &[u8; PACKET_LEN]) -> Result<(), TransportError> {
            self.written.push(*packet);
            Ok(())
        }

        fn read_packet(&mut self, _timeout: Duration) -> Result<[u8; PACKET_LEN], TransportError> {
            self.read_count += 1;
            self.reads.pop_front().unwrap_or(Err(TransportError::Timeout))
        }
    }

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| i as u8).collect()
    }

    /// Read a message with a short configuration
    pub fn read_with(t: &mut ScriptTransport, cfg: &ExchangeConfig) -> Result<WireMessage, Error> {
        let cancel = CancellationToken::new();
        let ctx = ReadContext {
            cfg,
            cancel: &cancel,
            deadline: Instant::now() + Duration::from_secs(5),
        };
        read_message(t, &ctx)
    }

    fn fast_cfg() -> ExchangeConfig {
        ExchangeConfig::default()
            .with_first_read_timeout(Duration::from_secs(1))
            .with_continuation_timeout(Duration::from_secs(1))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn host_first_packet_layout() {
        let m = WireMessage::new(11, vec![0xaa; 3]);
        let p = encode_packets(Direction::HostToDevice, &m);

        assert_eq!(p.len(), 1);
        assert_eq!(&p[0][..12], &[0x3f, b'#', b'#', 0, 11, 0, 0, 0, 3, 0xaa, 0xaa, 0xaa]);
        assert!(p[0][12..].iter().all(|b| *b == 0));
    }

    #[test]
    fn host_packet_counts() {
        let tests = &[(0, 1), (55, 1), (56, 2), (55 + 63, 2), (55 + 64, 3)];

        for (n, count) in tests {
            let m = WireMessage::new(38, payload(*n));
            let p = encode_packets(Direction::HostToDevice, &m);
            assert_eq!(p.len(), *count, "payload length {n}");
            assert!(p.iter().all(|p| p[0] == REPORT_ID));
        }
    }

    #[test]
    fn device_packet_counts() {
        let tests = &[(0, 1), (56, 1), (57, 2), (56 + 63, 2), (56 + 64, 3)];

        for (n, count) in tests {
            let m = WireMessage::new(12, payload(*n));
            let p = encode_packets(Direction::DeviceToHost, &m);
            assert_eq!(p.len(), *count, "payload length {n}");
            assert_eq!(&p[0][..2], b"##");
        }
    }

    #[test]
    fn read_invalid_magic() {
        let mut t = ScriptTransport::default();
        let mut p = [0u8; PACKET_LEN];
        p[..2].copy_from_slice(b"XX");
        t.reads.push_back(Ok(p));

        let r = read_with(&mut t, &fast_cfg());
        assert_eq!(r, Err(Error::Communication(CommError::InvalidMagic)));
    }

    #[test]
    fn read_too_large_before_continuation() {
        let mut t = ScriptTransport::default();
        t.queue(&WireMessage::new(12, payload(2000)));

        let r = read_with(&mut t, &fast_cfg());
        assert_eq!(r, Err(Error::Communication(CommError::ResponseTooLarge(2000))));

        // Only the first packet was consumed
        assert_eq!(t.read_count, 1);
    }

    #[test]
    fn read_first_timeout() {
        let mut t = ScriptTransport::default();

        let cfg = fast_cfg().with_first_read_timeout(Duration::from_millis(0));
        let r = read_with(&mut t, &cfg);
        assert_eq!(r, Err(Error::Timeout));
    }

    #[test]
    fn read_first_io_error() {
        let mut t = ScriptTransport::default();
        t.reads.push_back(Err(TransportError::Io("unplugged".to_string())));

        let r = read_with(&mut t, &fast_cfg());
        assert_eq!(
            r,
            Err(Error::Communication(CommError::Read("unplugged".to_string())))
        );
    }

    #[test]
    fn read_continuation_failure() {
        let mut t = ScriptTransport::default();
        let packets = encode_packets(Direction::DeviceToHost, &WireMessage::new(12, payload(100)));
        t.reads.push_back(Ok(packets[0]));
        t.reads.push_back(Err(TransportError::Io("unplugged".to_string())));

        let r = read_with(&mut t, &fast_cfg());
        assert_eq!(r, Err(Error::Communication(CommError::ContinuationRead)));
    }

    #[test]
    fn read_continuation_timeout() {
        let mut t = ScriptTransport::default();
        let packets = encode_packets(Direction::DeviceToHost, &WireMessage::new(12, payload(100)));
        t.reads.push_back(Ok(packets[0]));

        let cfg = fast_cfg().with_continuation_timeout(Duration::from_millis(0));
        let r = read_with(&mut t, &cfg);
        assert_eq!(r, Err(Error::Communication(CommError::ContinuationRead)));
    }

    #[test]
    fn read_cancelled() {
        let mut t = ScriptTransport::default();
        let cfg = fast_cfg();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let ctx = ReadContext {
            cfg: &cfg,
            cancel: &cancel,
            deadline: Instant::now() + Duration::from_secs(5),
        };
        assert_eq!(read_message(&mut t, &ctx), Err(Error::Cancelled));
    }

    #[test]
    fn read_past_deadline() {
        let mut t = ScriptTransport::default();
        let cfg = fast_cfg();

        let cancel = CancellationToken::new();
        let ctx = ReadContext {
            cfg: &cfg,
            cancel: &cancel,
            deadline: Instant::now(),
        };
        assert_eq!(read_message(&mut t, &ctx), Err(Error::Timeout));
    }

    #[test]
    fn write_cancelled() {
        let mut t = ScriptTransport::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let r = write_message(&mut t, &WireMessage::new(0, vec![]), &cancel);
        assert_eq!(r, Err(Error::Cancelled));
        assert!(t.written.is_empty());
    }

    proptest! {
        #[test]
        fn frame_reassemble_host(data in proptest::collection::vec(any::<u8>(), 0..600), kind in any::<u16>()) {
            let m = WireMessage::new(kind, data);
            let packets = encode_packets(Direction::HostToDevice, &m);

            let mut r = Reassembler::start(Direction::HostToDevice, 1024, &packets[0]).unwrap();
            for p in &packets[1..] {
                prop_assert!(!r.is_complete());
                r.push(p);
            }
            prop_assert!(r.is_complete());
            prop_assert_eq!(r.finish(), m);
        }

        #[test]
        fn frame_reassemble_device(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
            let m = WireMessage::new(40, data);

            let mut t = ScriptTransport::default();
            t.queue(&m);
            let n = t.reads.len();

            let r = read_with(&mut t, &fast_cfg()).unwrap();
            prop_assert_eq!(r, m);
            prop_assert_eq!(t.read_count, n);
        }
    }
}
