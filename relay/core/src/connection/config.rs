//! Connection Configuration

use std::time::Duration;

/// How the push channel is established and re-established
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Budget for transport open plus `hello` → `welcome`
    pub connect_timeout: Duration,

    /// Behaviour after an unexpected closure
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Exponential backoff for automatic reconnection
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect at all after an unexpected closure
    pub enabled: bool,

    /// Attempts before giving up
    pub max_attempts: u32,

    /// Delay before the first attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth factor between attempts
    pub multiplier: f32,

    /// Add up to 25% random jitter
    pub use_jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            use_jitter: false,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before attempt N (0-indexed)
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let grown = base_ms * f64::from(self.multiplier).powi(attempt as i32);

        let jittered = if self.use_jitter {
            grown * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            grown
        };

        // Jitter never pushes past the cap
        let duration_ms = jittered.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(duration_ms)
    }

    /// Whether another attempt is allowed after `attempts` failures
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.enabled && attempts < self.max_attempts
    }
}
