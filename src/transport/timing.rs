//! CoAP transmission parameters.
//!
//! Implements the derived timing values of RFC 7252 §4.8.2. The base values
//! are validated once when a [`TimingParams`] is built; every derived value
//! is computed at that point and never changes afterwards.

use std::time::Duration;

use rand::Rng;

use crate::core::constants;
use crate::core::{GatewayError, Result};

/// Validated CoAP transmission parameters with their derived values.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingParams {
    ack_timeout: Duration,
    ack_random_factor: f64,
    max_retransmit: u32,
    nstart: u32,
    default_leisure: Duration,
    probing_rate: u32,
    max_latency: Duration,

    // Derived
    max_transmit_span: Duration,
    max_transmit_wait: Duration,
    processing_delay: Duration,
    max_rtt: Duration,
    exchange_lifetime: Duration,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self::derive(
            constants::DEFAULT_ACK_TIMEOUT,
            constants::DEFAULT_ACK_RANDOM_FACTOR,
            constants::DEFAULT_MAX_RETRANSMIT,
            constants::DEFAULT_NSTART,
            constants::DEFAULT_LEISURE,
            constants::DEFAULT_PROBING_RATE,
            constants::DEFAULT_MAX_LATENCY,
        )
    }
}

impl TimingParams {
    /// Build parameters from the four base values that drive retry math.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the values are out of range or
    /// the derived timeline is not strictly increasing.
    pub fn new(
        ack_timeout: Duration,
        ack_random_factor: f64,
        max_retransmit: u32,
        max_latency: Duration,
    ) -> Result<Self> {
        TimingParamsBuilder::new()
            .ack_timeout(ack_timeout)
            .ack_random_factor(ack_random_factor)
            .max_retransmit(max_retransmit)
            .max_latency(max_latency)
            .build()
    }

    /// Start a builder seeded with the RFC defaults.
    pub fn builder() -> TimingParamsBuilder {
        TimingParamsBuilder::new()
    }

    fn derive(
        ack_timeout: Duration,
        ack_random_factor: f64,
        max_retransmit: u32,
        nstart: u32,
        default_leisure: Duration,
        probing_rate: u32,
        max_latency: Duration,
    ) -> Self {
        // ACK_TIMEOUT * ((2 ** MAX_RETRANSMIT) - 1) * ACK_RANDOM_FACTOR
        let span_factor = ((1u64 << max_retransmit) - 1) as f64 * ack_random_factor;
        let max_transmit_span = ack_timeout.mul_f64(span_factor);

        // ACK_TIMEOUT * ((2 ** (MAX_RETRANSMIT + 1)) - 1) * ACK_RANDOM_FACTOR
        let wait_factor = ((1u64 << (max_retransmit + 1)) - 1) as f64 * ack_random_factor;
        let max_transmit_wait = ack_timeout.mul_f64(wait_factor);

        let processing_delay = ack_timeout;
        let max_rtt = max_latency * 2 + processing_delay;
        let exchange_lifetime = max_transmit_span + max_rtt;

        Self {
            ack_timeout,
            ack_random_factor,
            max_retransmit,
            nstart,
            default_leisure,
            probing_rate,
            max_latency,
            max_transmit_span,
            max_transmit_wait,
            processing_delay,
            max_rtt,
            exchange_lifetime,
        }
    }

    /// ACK_TIMEOUT.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// ACK_RANDOM_FACTOR.
    pub fn ack_random_factor(&self) -> f64 {
        self.ack_random_factor
    }

    /// MAX_RETRANSMIT.
    pub fn max_retransmit(&self) -> u32 {
        self.max_retransmit
    }

    /// NSTART.
    pub fn nstart(&self) -> u32 {
        self.nstart
    }

    /// DEFAULT_LEISURE.
    pub fn default_leisure(&self) -> Duration {
        self.default_leisure
    }

    /// PROBING_RATE (bytes/second).
    pub fn probing_rate(&self) -> u32 {
        self.probing_rate
    }

    /// MAX_LATENCY.
    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    /// Time from the first transmission to the last retransmission.
    pub fn max_transmit_span(&self) -> Duration {
        self.max_transmit_span
    }

    /// Time from the first transmission until the sender gives up.
    pub fn max_transmit_wait(&self) -> Duration {
        self.max_transmit_wait
    }

    /// Time a node takes to turn a confirmable message into an ACK.
    pub fn processing_delay(&self) -> Duration {
        self.processing_delay
    }

    /// Maximum round-trip time.
    pub fn max_rtt(&self) -> Duration {
        self.max_rtt
    }

    /// Time after which message-layer state for an exchange can be purged.
    pub fn exchange_lifetime(&self) -> Duration {
        self.exchange_lifetime
    }

    /// Draw the first retransmission timeout for a new exchange.
    ///
    /// Uniform in `[ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR)`.
    pub fn initial_backoff(&self) -> Duration {
        let draw: f64 = rand::thread_rng().r#gen();
        self.backoff_for(draw)
    }

    /// First retransmission timeout for a given uniform draw in `[0, 1)`.
    pub fn backoff_for(&self, draw: f64) -> Duration {
        let draw = draw.clamp(0.0, 1.0);
        self.ack_timeout
            .mul_f64(1.0 + (self.ack_random_factor - 1.0) * draw)
    }
}

/// Builder for [`TimingParams`].
#[derive(Debug, Clone)]
pub struct TimingParamsBuilder {
    ack_timeout: Duration,
    ack_random_factor: f64,
    max_retransmit: u32,
    nstart: u32,
    default_leisure: Duration,
    probing_rate: u32,
    max_latency: Duration,
}

impl Default for TimingParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingParamsBuilder {
    /// Create a builder with the RFC 7252 defaults.
    pub fn new() -> Self {
        Self {
            ack_timeout: constants::DEFAULT_ACK_TIMEOUT,
            ack_random_factor: constants::DEFAULT_ACK_RANDOM_FACTOR,
            max_retransmit: constants::DEFAULT_MAX_RETRANSMIT,
            nstart: constants::DEFAULT_NSTART,
            default_leisure: constants::DEFAULT_LEISURE,
            probing_rate: constants::DEFAULT_PROBING_RATE,
            max_latency: constants::DEFAULT_MAX_LATENCY,
        }
    }

    /// Set ACK_TIMEOUT.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set ACK_RANDOM_FACTOR.
    pub fn ack_random_factor(mut self, factor: f64) -> Self {
        self.ack_random_factor = factor;
        self
    }

    /// Set MAX_RETRANSMIT.
    pub fn max_retransmit(mut self, count: u32) -> Self {
        self.max_retransmit = count;
        self
    }

    /// Set NSTART.
    pub fn nstart(mut self, nstart: u32) -> Self {
        self.nstart = nstart;
        self
    }

    /// Set DEFAULT_LEISURE.
    pub fn default_leisure(mut self, leisure: Duration) -> Self {
        self.default_leisure = leisure;
        self
    }

    /// Set PROBING_RATE.
    pub fn probing_rate(mut self, rate: u32) -> Self {
        self.probing_rate = rate;
        self
    }

    /// Set MAX_LATENCY.
    pub fn max_latency(mut self, latency: Duration) -> Self {
        self.max_latency = latency;
        self
    }

    /// Validate the base values and compute the derived ones.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when a base value is out of range or
    /// `max_transmit_span < max_transmit_wait < exchange_lifetime` does not
    /// hold.
    pub fn build(self) -> Result<TimingParams> {
        if self.ack_timeout.is_zero() {
            return Err(GatewayError::Config("ack_timeout must be positive".into()));
        }
        if !self.ack_random_factor.is_finite() || self.ack_random_factor < 1.0 {
            return Err(GatewayError::Config(format!(
                "ack_random_factor must be >= 1.0, got {}",
                self.ack_random_factor
            )));
        }
        if self.max_retransmit > constants::MAX_RETRANSMIT_LIMIT {
            return Err(GatewayError::Config(format!(
                "max_retransmit must be <= {}, got {}",
                constants::MAX_RETRANSMIT_LIMIT,
                self.max_retransmit
            )));
        }
        if self.nstart == 0 {
            return Err(GatewayError::Config("nstart must be at least 1".into()));
        }

        let params = TimingParams::derive(
            self.ack_timeout,
            self.ack_random_factor,
            self.max_retransmit,
            self.nstart,
            self.default_leisure,
            self.probing_rate,
            self.max_latency,
        );

        if params.max_transmit_span >= params.max_transmit_wait
            || params.max_transmit_wait >= params.exchange_lifetime
        {
            return Err(GatewayError::Config(format!(
                "max_latency {:?} too small for the retransmit schedule (wait {:?}, lifetime {:?})",
                params.max_latency, params.max_transmit_wait, params.exchange_lifetime
            )));
        }

        Ok(params)
    }
}
