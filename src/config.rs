//! Runtime configuration.

use std::time::Duration;

use crate::ble::characteristics::WriteMode;
use crate::registry::MAX_PEERS;

/// Period of the ticker.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long a scan runs before the stack stops it on its own.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(30);

/// How long the host stack waits for a connection to complete.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of a [`Central`](crate::Central) and its host stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtuConfig {
    /// Number of peers the registry holds.
    pub registry_capacity: usize,
    /// Period of the ticker.
    pub tick_interval: Duration,
    /// Scan window; `None` scans until told to stop.
    pub scan_window: Option<Duration>,
    /// Connection timeout of the host stack.
    pub connect_timeout: Duration,
    /// Register only advertisers carrying WPT service data.
    pub wpt_only: bool,
    /// How PRU Control is written.
    pub control_write_mode: WriteMode,
}

impl Default for PtuConfig {
    fn default() -> Self {
        Self {
            registry_capacity: MAX_PEERS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            scan_window: Some(DEFAULT_SCAN_WINDOW),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            wpt_only: true,
            control_write_mode: WriteMode::WithResponse,
        }
    }
}

impl PtuConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry capacity.
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Set the ticker period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the scan window.
    pub fn with_scan_window(mut self, window: Option<Duration>) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the host connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Register every advertiser, not only PRUs.
    pub fn with_wpt_only(mut self, wpt_only: bool) -> Self {
        self.wpt_only = wpt_only;
        self
    }

    /// Set how PRU Control is written.
    pub fn with_control_write_mode(mut self, mode: WriteMode) -> Self {
        self.control_write_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PtuConfig::default();
        assert_eq!(config.registry_capacity, 10);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.wpt_only);
        assert_eq!(config.control_write_mode, WriteMode::WithResponse);
    }

    #[test]
    fn test_builders() {
        let config = PtuConfig::new()
            .with_registry_capacity(3)
            .with_scan_window(None)
            .with_wpt_only(false)
            .with_control_write_mode(WriteMode::WithoutResponse);

        assert_eq!(config.registry_capacity, 3);
        assert_eq!(config.scan_window, None);
        assert!(!config.wpt_only);
        assert_eq!(config.control_write_mode, WriteMode::WithoutResponse);
    }
}
