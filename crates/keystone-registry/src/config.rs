//! Reconciler configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// How long to wait for newly added DONs to show up in reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Reads of the DON list before giving up. Zero is treated as one.
    pub attempts: u32,
    /// Fixed delay between reads.
    pub delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

impl PollConfig {
    /// Poll without sleeping (in-memory backends, tests).
    #[must_use]
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Configuration for a [`Reconciler`](crate::Reconciler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Chain whose node keys are read from the node directory.
    pub chain_selector: u64,

    /// DON read-after-write polling.
    pub don_poll: PollConfig,

    /// Register DONs as public, i.e. their reports are signature-checked.
    pub verify_signatures: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            chain_selector: 0,
            don_poll: PollConfig::default(),
            verify_signatures: true,
        }
    }
}

impl ReconcileConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// - `KEYSTONE_CHAIN_SELECTOR`
    /// - `KEYSTONE_DON_POLL_ATTEMPTS`
    /// - `KEYSTONE_DON_POLL_DELAY_MS`
    /// - `KEYSTONE_VERIFY_SIGNATURES`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("KEYSTONE_CHAIN_SELECTOR") {
            config.chain_selector = parse("KEYSTONE_CHAIN_SELECTOR", &v)?;
        }
        if let Some(v) = lookup("KEYSTONE_DON_POLL_ATTEMPTS") {
            config.don_poll.attempts = parse("KEYSTONE_DON_POLL_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("KEYSTONE_DON_POLL_DELAY_MS") {
            config.don_poll.delay = Duration::from_millis(parse("KEYSTONE_DON_POLL_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("KEYSTONE_VERIFY_SIGNATURES") {
            config.verify_signatures = parse("KEYSTONE_VERIFY_SIGNATURES", &v)?;
        }

        Ok(config)
    }

    /// Set the chain selector.
    #[must_use]
    pub fn with_chain_selector(mut self, chain_selector: u64) -> Self {
        self.chain_selector = chain_selector;
        self
    }

    /// Set the DON poll schedule.
    #[must_use]
    pub fn with_don_poll(mut self, poll: PollConfig) -> Self {
        self.don_poll = poll;
        self
    }

    /// Set whether DON reports are signature-checked.
    #[must_use]
    pub fn with_signature_verification(mut self, verify: bool) -> Self {
        self.verify_signatures = verify;
        self
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| Error::Config(format!("{key}={value:?}: {e}")))
}
