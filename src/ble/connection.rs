//! Connection session state.
//!
//! Holds the single active (or pending) link to a PRU: its lifecycle state,
//! the operator's peer selection, negotiated parameters and cached handles.
//! Transitions are driven by the event dispatcher and operator commands in
//! [`crate::central`].

use crate::ble::characteristics::{AttributeHandles, CccdState};

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Stack not started yet, or powered down.
    ///
    /// The scan window ending without a connect intent, or a refused
    /// rescan, lands here with hibernate requested; the power policy then
    /// hibernates and the next wake restarts scanning.
    #[default]
    Idle,
    /// Scanning for PRUs.
    Scanning,
    /// Stopping the scan and connecting to the selected PRU.
    Connecting,
    /// Link established.
    Connected,
    /// Link lost; scanning restarts immediately.
    Disconnected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Connection parameters reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionParams {
    /// Connection interval in 1.25 ms units.
    pub interval: u16,
    /// Peripheral latency in connection events.
    pub latency: u16,
    /// Supervision timeout in 10 ms units.
    pub supervision_timeout: u16,
}

impl ConnectionParams {
    /// Connection interval in milliseconds (truncated).
    pub fn interval_ms(&self) -> u32 {
        self.interval as u32 * 5 / 4
    }

    /// Supervision timeout in milliseconds.
    pub fn supervision_timeout_ms(&self) -> u32 {
        self.supervision_timeout as u32 * 10
    }
}

impl std::fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "interval {:#x} ({} ms), latency {}, supervision timeout {} ms",
            self.interval,
            self.interval_ms(),
            self.latency,
            self.supervision_timeout_ms()
        )
    }
}

/// The single connection session.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSession {
    /// Lifecycle state.
    pub(crate) state: ConnectionState,
    /// Registry index chosen by the operator.
    pub(crate) selected_peer: Option<usize>,
    /// Registry index the current link was opened to.
    pub(crate) active_peer: Option<usize>,
    /// Operator asked to connect; the scan is being stopped.
    pub(crate) connect_intent: bool,
    /// The connect request has been handed to the stack.
    pub(crate) connect_issued: bool,
    /// Restart scanning when the pending scan-stop arrives.
    pub(crate) rescan_on_stop: bool,
    /// Scan window ended with nothing to connect to.
    pub(crate) hibernate_requested: bool,
    /// Negotiated parameters of the current link.
    pub(crate) params: Option<ConnectionParams>,
    /// Cached handles of the current link.
    pub(crate) handles: AttributeHandles,
    /// PRU Alert CCCD shadow.
    pub(crate) alert_cccd: CccdState,
}

impl ConnectionSession {
    /// Create a session in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the operator's peer selection.
    pub fn selected_peer(&self) -> Option<usize> {
        self.selected_peer
    }

    /// Get the peer of the current link.
    pub fn active_peer(&self) -> Option<usize> {
        self.active_peer
    }

    /// Check if a connect was requested and not yet resolved.
    pub fn has_connect_intent(&self) -> bool {
        self.connect_intent
    }

    /// Get the negotiated connection parameters.
    pub fn params(&self) -> Option<ConnectionParams> {
        self.params
    }

    /// Get the cached attribute handles.
    pub fn handles(&self) -> &AttributeHandles {
        &self.handles
    }

    /// Get the PRU Alert CCCD shadow.
    pub fn alert_cccd(&self) -> CccdState {
        self.alert_cccd
    }

    /// Drop everything tied to the current link.
    pub(crate) fn clear_link(&mut self) {
        self.connect_intent = false;
        self.connect_issued = false;
        self.params = None;
        self.handles = AttributeHandles::default();
        self.alert_cccd = CccdState::default();
        self.active_peer = None;
    }
}
