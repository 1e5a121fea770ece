//! Master-side configuration.

use std::time::Duration;

use sermod_transport::SerialConfig;

/// Policy applied while the master is trying to recover a lost device.
///
/// The default polls once a second forever with no backoff, which suits
/// a device that gets unplugged and plugged back in at some point.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt and between attempts.
    pub interval: Duration,
    /// Stop after this many attempts; `None` keeps polling forever.
    pub max_attempts: Option<u32>,
    /// Multiplier applied to the interval after each failed attempt.
    pub backoff: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
            backoff: 1.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Configuration for [`RtuMaster`](crate::RtuMaster).
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Serial line settings used when opening the port.
    pub serial: SerialConfig,
    /// Upper bound on the time spent waiting for a complete response.
    pub timeout: Duration,
    /// Recovery behavior after the device disappears.
    pub reconnect: ReconnectPolicy,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            timeout: Duration::from_millis(2000),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MasterConfig {
    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
