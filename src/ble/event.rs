//! Inbound events from the BLE stack.

use bytes::Bytes;

use crate::ble::advertising::AdvertisementReport;
use crate::ble::characteristics::{AttributeHandles, WptCharacteristic};
use crate::ble::connection::ConnectionParams;

/// Identifies the attribute a response or notification refers to.
///
/// Stacks report either a handle, a characteristic, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeRef {
    /// Attribute handle, if the stack reports one.
    pub handle: Option<u16>,
    /// Characteristic, if the stack resolved it.
    pub characteristic: Option<WptCharacteristic>,
}

impl AttributeRef {
    /// Reference by characteristic only.
    pub fn characteristic(characteristic: WptCharacteristic) -> Self {
        Self {
            handle: None,
            characteristic: Some(characteristic),
        }
    }
}

impl std::fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.characteristic, self.handle) {
            (Some(c), Some(h)) => write!(f, "{} ({:#06x})", c, h),
            (Some(c), None) => write!(f, "{}", c),
            (None, Some(h)) => write!(f, "handle {:#06x}", h),
            (None, None) => write!(f, "unknown attribute"),
        }
    }
}

/// Category of a stack error that is not an attribute-protocol error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericErrorKind {
    /// A procedure timed out inside the stack.
    Timeout,
    /// The controller reported a hardware error.
    Hardware,
    /// An HCI command completed with an error status.
    Hci,
}

impl std::fmt::Display for GenericErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Hardware => write!(f, "hardware error"),
            Self::Hci => write!(f, "HCI error"),
        }
    }
}

/// An event delivered by the BLE stack.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    /// The stack finished initialising.
    StackReady,
    /// Scanning started.
    ScanStarted,
    /// An advertisement was received while scanning.
    ScanResult(AdvertisementReport),
    /// Scanning stopped (requested, or the scan window elapsed).
    ScanStopped,
    /// A link to the requested peer was established.
    LinkEstablished {
        /// Negotiated parameters, when the stack reports them.
        params: Option<ConnectionParams>,
    },
    /// The link was lost or closed, or the connect attempt failed.
    LinkLost {
        /// HCI reason code.
        reason: u8,
    },
    /// The controller updated the connection parameters.
    ConnectionParamsUpdated(ConnectionParams),
    /// GATT discovery finished.
    DiscoveryComplete(AttributeHandles),
    /// Response to a read request.
    ReadResponse {
        /// Attribute that was read.
        attribute: AttributeRef,
        /// Value returned by the peer.
        value: Bytes,
    },
    /// Response to a write request.
    WriteResponse {
        /// Attribute that was written.
        attribute: AttributeRef,
    },
    /// Handle value notification.
    Notification {
        /// Source attribute.
        attribute: AttributeRef,
        /// Notified value.
        value: Bytes,
    },
    /// Handle value indication.
    Indication {
        /// Source attribute.
        attribute: AttributeRef,
        /// Indicated value.
        value: Bytes,
    },
    /// Attribute-protocol error response.
    ErrorResponse {
        /// ATT opcode of the failed request.
        opcode: u8,
        /// Attribute handle in error.
        handle: u16,
        /// ATT error code.
        error_code: u8,
    },
    /// Any other stack-level error.
    GenericError {
        /// Error category.
        kind: GenericErrorKind,
        /// Stack-specific code.
        code: u32,
    },
    /// An event the core does not know about.
    Unrecognized {
        /// Raw event code.
        code: u32,
    },
}

impl StackEvent {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StackReady => "stack ready",
            Self::ScanStarted => "scan started",
            Self::ScanResult(_) => "scan result",
            Self::ScanStopped => "scan stopped",
            Self::LinkEstablished { .. } => "link established",
            Self::LinkLost { .. } => "link lost",
            Self::ConnectionParamsUpdated(_) => "connection parameters updated",
            Self::DiscoveryComplete(_) => "discovery complete",
            Self::ReadResponse { .. } => "read response",
            Self::WriteResponse { .. } => "write response",
            Self::Notification { .. } => "notification",
            Self::Indication { .. } => "indication",
            Self::ErrorResponse { .. } => "error response",
            Self::GenericError { .. } => "generic error",
            Self::Unrecognized { .. } => "unrecognized event",
        }
    }
}
