//! Transport options and reconnect policy.

use std::time::Duration;

use verto_protocol::LoginParams;

/// Shortest delay between reconnect attempts.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

/// Delay schedule between reconnect attempts.
///
/// The default is a fixed one-second delay (`multiplier` of 1.0). Raising the
/// multiplier turns it into capped exponential backoff. Delays never drop
/// below [`MIN_RECONNECT_DELAY`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1000),
            multiplier: 1.0,
        }
    }
}

impl ReconnectPolicy {
    /// Creates a fixed-delay policy.
    pub fn fixed(delay: Duration) -> Self {
        let delay = delay.max(MIN_RECONNECT_DELAY);
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_delay = initial.max(MIN_RECONNECT_DELAY);
        self.max_delay = max.max(self.initial_delay);
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Calculates the delay before reconnect attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64();
        let delay = base * self.multiplier.powi(attempt as i32 - 1);
        let max = self.max_delay.as_secs_f64();

        Duration::from_secs_f64(delay.min(max)).max(MIN_RECONNECT_DELAY)
    }
}

/// Options for a [`JsonRpcClient`](super::JsonRpcClient).
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// WebSocket URL (`ws://` or `wss://`).
    pub socket_url: String,
    /// Credentials used for transparent re-authentication.
    pub credentials: Option<LoginParams>,
    /// Reconnect schedule.
    pub reconnect: ReconnectPolicy,
}

impl TransportOptions {
    /// Creates options for the given socket URL.
    pub fn new(socket_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            credentials: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Builder: set credentials.
    pub fn with_credentials(mut self, credentials: LoginParams) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Builder: set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}
