// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Request / response exchange with button confirmation handling
//!
//! Each exchange writes a request then reads responses until a terminal
//! message arrives. Where the device responds with a `ButtonRequest` the
//! host acknowledges with a `ButtonAck` and waits again, for any number of
//! rounds, bounded by the overall exchange deadline and cancellation.

use std::time::Instant;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use trezor_nostr_proto::{
    button::{ButtonAckReq, ButtonRequestResp},
    failure::FailureResp,
    DecodeOwned, MessageType, ProtoError, WireStatic,
};

use crate::{
    framer::{read_message, write_message, ReadContext, WireMessage},
    transport::Transport,
    CommError, Error, ExchangeConfig,
};

/// Exchange phase, for diagnostics
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
pub enum Phase {
    /// Request written, awaiting the first response
    Sent,
    /// Acknowledged a button request, awaiting the next response
    AwaitingButton { round: usize },
}

/// Terminal exchange outcome
#[derive(Clone, Debug, PartialEq)]
pub enum ExchangeOutcome {
    /// Device responded with a non-failure message
    Success(WireMessage),
    /// Device responded with a failure
    DeviceFailure(FailureResp),
}

/// Execute an exchange, calling `on_button` for each button request
///
/// Link errors abort the exchange immediately, no retries are attempted.
pub fn exchange<T: Transport + ?Sized>(
    t: &mut T,
    req: &WireMessage,
    cfg: &ExchangeConfig,
    cancel: &CancellationToken,
    mut on_button: impl FnMut(&ButtonRequestResp),
) -> Result<ExchangeOutcome, Error> {
    let ctx = ReadContext {
        cfg,
        cancel,
        deadline: Instant::now() + cfg.exchange_deadline(),
    };

    // Write request
    write_message(t, req, cancel)?;
    let mut phase = Phase::Sent;

    let ack = WireMessage::encode(&ButtonAckReq {})?;

    loop {
        let resp = read_message(t, &ctx)?;

        match resp.kind() {
            Some(MessageType::ButtonRequest) => {
                let b = resp.decode::<ButtonRequestResp>()?;

                let round = match phase {
                    Phase::Sent => 1,
                    Phase::AwaitingButton { round } => round + 1,
                };

                debug!(
                    "Button request (code: {:?}, round: {}), awaiting confirmation",
                    b.code, round
                );

                on_button(&b);

                write_message(t, &ack, cancel)?;
                phase = Phase::AwaitingButton { round };
            }
            Some(MessageType::Failure) => {
                let f = resp.decode::<FailureResp>()?;

                warn!("Device failure (code: {}): {}", f.code, f.message);

                return Ok(ExchangeOutcome::DeviceFailure(f));
            }
            _ => {
                debug!("Exchange complete ({})", phase);
                return Ok(ExchangeOutcome::Success(resp));
            }
        }
    }
}

/// Resolve an exchange outcome to the expected response type
pub fn expect<M>(outcome: ExchangeOutcome) -> Result<M, Error>
where
    M: DecodeOwned<Output = M, Error = ProtoError> + WireStatic,
{
    match outcome {
        ExchangeOutcome::Success(m) => match m.decode::<M>() {
            Ok(v) => Ok(v),
            Err(e @ CommError::UnexpectedResponse(_)) => {
                warn!(
                    "Unexpected response type {} (expected {})",
                    m.message_type,
                    M::MESSAGE_TYPE
                );
                Err(Error::Communication(e))
            }
            Err(e) => Err(Error::Communication(e)),
        },
        ExchangeOutcome::DeviceFailure(f) => Err(Error::from(f)),
    }
}
