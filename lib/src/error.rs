// Copyright (c) 2022-2023 The MobileCoin Foundation

use trezor_nostr_proto::{failure::FailureResp, ProtoError};

/// Trezor Nostr API Error Type
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport unavailable in this build
    #[error("HID transport not available")]
    Unsupported,

    /// HID Init Error
    #[error("could not create HidApi instance")]
    HidInit,

    /// Device not connected or not open
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Link level communication failure
    #[error("Communication error: {0}")]
    Communication(CommError),

    /// Timeout waiting for device response
    #[error("Timeout waiting for device response")]
    Timeout,

    /// Operation cancelled by caller
    #[error("Operation cancelled")]
    Cancelled,

    /// User rejected operation on device
    #[error("Operation rejected by user: {0}")]
    UserRejected(String),

    /// Device reported a failure
    #[error("Device failure (code: {code}): {message}")]
    DeviceFailure { code: u32, message: String },

    /// Operation failed before reaching the device
    #[error("Operation failed: {0}")]
    Failed(String),
}

/// Communication error detail
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CommError {
    /// Failed writing a packet
    #[error("failed to write to device: {0}")]
    Write(String),

    /// Failed reading the first response packet
    #[error("failed to read from device: {0}")]
    Read(String),

    /// Response header magic mismatch
    #[error("invalid response magic")]
    InvalidMagic,

    /// Declared response length exceeds receive capacity
    #[error("response too large ({0} bytes)")]
    ResponseTooLarge(usize),

    /// Timeout or failure reading a continuation packet
    #[error("failed to read continuation packet")]
    ContinuationRead,

    /// Response message type does not match request
    #[error("unexpected response type: {0}")]
    UnexpectedResponse(u16),

    /// Response payload could not be decoded
    #[error("malformed response: {0}")]
    Malformed(ProtoError),
}

impl Error {
    /// Check whether the error indicates the user declined on-device
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Error::UserRejected(_))
    }

    /// Check whether an operation may reasonably be retried as-is
    ///
    /// Timeouts, cancellation and transient link failures are retryable,
    /// malformed or unexpected responses and device failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout | Error::Cancelled => true,
            Error::Communication(c) => matches!(
                c,
                CommError::Write(_)
                    | CommError::Read(_)
                    | CommError::InvalidMagic
                    | CommError::ContinuationRead
            ),
            _ => false,
        }
    }
}

impl From<CommError> for Error {
    fn from(e: CommError) -> Self {
        Error::Communication(e)
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Error::Communication(CommError::Malformed(e))
    }
}

/// Map device failures to user rejection or generic device failure
impl From<FailureResp> for Error {
    fn from(f: FailureResp) -> Self {
        let message = f.message.to_string();

        match f.is_user_rejection() {
            true => Error::UserRejected(message),
            false => Error::DeviceFailure {
                code: f.code,
                message,
            },
        }
    }
}

#[cfg(feature = "transport_hid")]
impl From<hidapi::HidError> for Error {
    fn from(_e: hidapi::HidError) -> Self {
        Error::HidInit
    }
}

#[cfg(test)]
mod test {
    use trezor_nostr_proto::failure::FailureCode;

    use super::*;

    #[test]
    fn failure_mapping() {
        let e = Error::from(FailureResp::new(FailureCode::ActionCancelled, "Cancelled"));
        assert_eq!(e, Error::UserRejected("Cancelled".to_string()));
        assert!(e.is_user_rejection());
        assert!(!e.is_retryable());

        let e = Error::from(FailureResp::new(FailureCode::PinCancelled, "PIN cancelled"));
        assert!(e.is_user_rejection());

        let e = Error::from(FailureResp::new(FailureCode::DataError, "bad data"));
        assert_eq!(
            e,
            Error::DeviceFailure {
                code: 3,
                message: "bad data".to_string()
            }
        );
        assert!(!e.is_user_rejection());
    }

    #[test]
    fn retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Communication(CommError::ContinuationRead).is_retryable());
        assert!(!Error::Communication(CommError::ResponseTooLarge(4096)).is_retryable());
        assert!(!Error::from(ProtoError::Truncated).is_retryable());
        assert!(!Error::Failed("hash".to_string()).is_retryable());
    }
}
