// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Exchange timing and buffer configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default first response packet timeout (allows for user interaction)
pub const FIRST_READ_TIMEOUT_S: u64 = 60;

/// Default continuation packet timeout
pub const CONTINUATION_TIMEOUT_S: u64 = 30;

/// Default overall exchange deadline, including button confirmation rounds
pub const EXCHANGE_DEADLINE_S: u64 = 300;

/// Default read slice for cancellation / deadline checks
pub const POLL_INTERVAL_MS: u64 = 250;

/// Default maximum response payload size
pub const RECV_CAPACITY: usize = 1024;

/// Exchange configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Timeout for the first packet of each response (seconds)
    #[clap(long, default_value_t = FIRST_READ_TIMEOUT_S)]
    pub first_read_timeout_s: u64,

    /// Timeout for response continuation packets (seconds)
    #[clap(long, default_value_t = CONTINUATION_TIMEOUT_S)]
    pub continuation_timeout_s: u64,

    /// Overall deadline for an exchange including confirmations (seconds)
    #[clap(long, default_value_t = EXCHANGE_DEADLINE_S)]
    pub exchange_deadline_s: u64,

    /// Read slice for cancellation checks (milliseconds)
    #[clap(long, default_value_t = POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Maximum response payload size (bytes)
    #[clap(long, default_value_t = RECV_CAPACITY)]
    pub recv_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            first_read_timeout_s: FIRST_READ_TIMEOUT_S,
            continuation_timeout_s: CONTINUATION_TIMEOUT_S,
            exchange_deadline_s: EXCHANGE_DEADLINE_S,
            poll_interval_ms: POLL_INTERVAL_MS,
            recv_capacity: RECV_CAPACITY,
        }
    }
}

impl ExchangeConfig {
    /// Set the first response packet timeout
    pub fn with_first_read_timeout(mut self, d: Duration) -> Self {
        self.first_read_timeout_s = d.as_secs();
        self
    }

    /// Set the continuation packet timeout
    pub fn with_continuation_timeout(mut self, d: Duration) -> Self {
        self.continuation_timeout_s = d.as_secs();
        self
    }

    /// Set the overall exchange deadline
    pub fn with_exchange_deadline(mut self, d: Duration) -> Self {
        self.exchange_deadline_s = d.as_secs();
        self
    }

    /// Set the read slice used for cancellation checks
    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval_ms = d.as_millis() as u64;
        self
    }

    /// Set the maximum response payload size
    pub fn with_recv_capacity(mut self, n: usize) -> Self {
        self.recv_capacity = n;
        self
    }

    /// Helper to fetch first read timeout
    pub fn first_read_timeout(&self) -> Duration {
        Duration::from_secs(self.first_read_timeout_s)
    }

    /// Helper to fetch continuation timeout
    pub fn continuation_timeout(&self) -> Duration {
        Duration::from_secs(self.continuation_timeout_s)
    }

    /// Helper to fetch exchange deadline
    pub fn exchange_deadline(&self) -> Duration {
        Duration::from_secs(self.exchange_deadline_s)
    }

    /// Helper to fetch poll interval, never zero
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
