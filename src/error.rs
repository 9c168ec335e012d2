//! Error types for the wpt-ptu-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The BLE stack refused a request synchronously.
    #[error("Stack rejected {operation}: {reason}")]
    Rejected {
        /// The operation that was attempted.
        operation: &'static str,
        /// Why the stack refused it.
        reason: String,
    },

    /// Operation requires a link but none is established.
    #[error("PRU not connected")]
    NotConnected,

    /// The command is not valid in the current session state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The session state at the time.
        state: String,
    },

    /// The operator slot already holds a deferred request.
    #[error("Request already pending, try again after the current response")]
    Busy,

    /// Terminal input did not map to any command.
    #[error("Unknown command: {0:?}")]
    UnknownCommand(char),

    /// A peer selection was followed by something other than a digit.
    #[error("Wrong digit: {0:?}")]
    InvalidPeerDigit(char),

    /// The selected registry index does not refer to a discovered peer.
    #[error("Invalid peer index {index} ({count} peers discovered)")]
    InvalidPeerIndex {
        /// The index that was requested.
        index: usize,
        /// The number of peers in the registry.
        count: usize,
    },

    /// Connect was requested before any peer was selected.
    #[error("No peer selected")]
    NoPeerSelected,

    /// Invalid data was received from the PRU or the stack.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A channel between the core and the stack worker was closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
