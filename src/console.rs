//! Operator terminal commands.
//!
//! The operator drives the PTU with single, case-sensitive characters.
//! Peer selection takes two: `z` followed by the registry digit.

use crate::ble::characteristics::{CccdChange, ChargeChange, WptCharacteristic};
use crate::command::GattIntent;
use crate::error::{Error, Result};

/// Help text printed for `h`.
pub const HELP_TEXT: &str = "\
Available commands:
 'h' - Help menu.
 'z' + 'Number' - Select peer device.
 'c' - Send connect request to peer device.
 'd' - Send disconnect request to peer device.
 'v' - Cancel connection request.
 's' - Start discovery procedure.
 '1' - Enable notifications for Alert characteristic.
 '2' - Enable indications for Alert characteristic.
 '3' - Disable notifications and indication for Alert characteristic.
 '4' - Send Read request for PRU Static Parameter characteristic.
 '5' - Send Read request for PRU Dynamic Parameter characteristic.
 '6' - Send Enable Charging command to PRU control characteristic.
 '7' - Send Disable Charging command to PRU control characteristic.
 '8' - Enable sequential read of PRU Dynamic Parameter characteristic.
 '9' - Disable sequential read of PRU Dynamic Parameter characteristic.";

/// A command typed by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `h`
    Help,
    /// `z<digit>`
    SelectPeer(u8),
    /// `c`
    Connect,
    /// `v`
    CancelConnect,
    /// `d`
    Disconnect,
    /// `s`
    StartDiscovery,
    /// `1`
    EnableAlertNotifications,
    /// `2`
    EnableAlertIndications,
    /// `3`
    DisableAlert,
    /// `4`
    ReadStaticParameters,
    /// `5`
    ReadDynamicParameters,
    /// `6`
    EnableCharging,
    /// `7`
    DisableCharging,
    /// `8`
    StartDynamicPolling,
    /// `9`
    StopDynamicPolling,
}

impl OperatorCommand {
    /// Map a single key to a command. `z` is handled by [`KeyParser`].
    pub fn from_key(key: char) -> Option<Self> {
        let command = match key {
            'h' => Self::Help,
            'c' => Self::Connect,
            'v' => Self::CancelConnect,
            'd' => Self::Disconnect,
            's' => Self::StartDiscovery,
            '1' => Self::EnableAlertNotifications,
            '2' => Self::EnableAlertIndications,
            '3' => Self::DisableAlert,
            '4' => Self::ReadStaticParameters,
            '5' => Self::ReadDynamicParameters,
            '6' => Self::EnableCharging,
            '7' => Self::DisableCharging,
            '8' => Self::StartDynamicPolling,
            '9' => Self::StopDynamicPolling,
            _ => return None,
        };
        Some(command)
    }

    /// The attribute-protocol operation this command asks for, if any.
    ///
    /// Commands without one act on local or link-level state immediately.
    pub fn gatt_intent(&self) -> Option<GattIntent> {
        match self {
            Self::StartDiscovery => Some(GattIntent::Discover),
            Self::EnableAlertNotifications => {
                Some(GattIntent::AlertCccd(CccdChange::EnableNotifications))
            }
            Self::EnableAlertIndications => {
                Some(GattIntent::AlertCccd(CccdChange::EnableIndications))
            }
            Self::DisableAlert => Some(GattIntent::AlertCccd(CccdChange::Disable)),
            Self::ReadStaticParameters => Some(GattIntent::Read(WptCharacteristic::PruStatic)),
            Self::ReadDynamicParameters => Some(GattIntent::Read(WptCharacteristic::PruDynamic)),
            Self::EnableCharging => Some(GattIntent::Charge(ChargeChange::Enable)),
            Self::DisableCharging => Some(GattIntent::Charge(ChargeChange::Disable)),
            Self::Help
            | Self::SelectPeer(_)
            | Self::Connect
            | Self::CancelConnect
            | Self::Disconnect
            | Self::StartDynamicPolling
            | Self::StopDynamicPolling => None,
        }
    }
}

/// Turns terminal characters into [`OperatorCommand`]s.
#[derive(Debug, Clone, Default)]
pub struct KeyParser {
    awaiting_digit: bool,
}

impl KeyParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a `z` was typed and the digit is still expected.
    pub fn is_awaiting_digit(&self) -> bool {
        self.awaiting_digit
    }

    /// Feed one character.
    ///
    /// Returns `None` when more input is needed or the character is
    /// whitespace, otherwise the parsed command or the input error.
    pub fn feed(&mut self, key: char) -> Option<Result<OperatorCommand>> {
        if matches!(key, '\r' | '\n' | ' ') {
            return None;
        }

        if self.awaiting_digit {
            self.awaiting_digit = false;
            return Some(match key.to_digit(10) {
                Some(digit) => Ok(OperatorCommand::SelectPeer(digit as u8)),
                None => Err(Error::InvalidPeerDigit(key)),
            });
        }

        if key == 'z' {
            self.awaiting_digit = true;
            return None;
        }

        Some(OperatorCommand::from_key(key).ok_or(Error::UnknownCommand(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_all(input: &str) -> Vec<Result<OperatorCommand>> {
        let mut parser = KeyParser::new();
        input.chars().filter_map(|c| parser.feed(c)).collect()
    }

    #[test]
    fn test_single_keys() {
        let commands: Vec<_> = parse_all("hcvds123456789")
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(commands.len(), 14);
        assert_eq!(commands[0], OperatorCommand::Help);
        assert_eq!(commands[5], OperatorCommand::EnableAlertNotifications);
        assert_eq!(commands[13], OperatorCommand::StopDynamicPolling);
    }

    #[test]
    fn test_select_peer() {
        let mut parser = KeyParser::new();
        assert!(parser.feed('z').is_none());
        assert!(parser.is_awaiting_digit());
        assert_eq!(parser.feed('3').unwrap().unwrap(), OperatorCommand::SelectPeer(3));
        assert!(!parser.is_awaiting_digit());
    }

    #[test]
    fn test_select_peer_wrong_digit() {
        let results = parse_all("zxc");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(Error::InvalidPeerDigit('x'))));
        // The key after a bad digit is parsed normally
        assert_eq!(results[1].as_ref().unwrap(), &OperatorCommand::Connect);
    }

    #[test]
    fn test_unknown_and_case_sensitive() {
        let results = parse_all("C?");
        assert!(matches!(results[0], Err(Error::UnknownCommand('C'))));
        assert!(matches!(results[1], Err(Error::UnknownCommand('?'))));
    }

    #[test]
    fn test_whitespace_ignored() {
        let results = parse_all("z\r\n1");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &OperatorCommand::SelectPeer(1));
    }

    #[test]
    fn test_gatt_intents() {
        assert_eq!(
            OperatorCommand::StartDiscovery.gatt_intent(),
            Some(GattIntent::Discover)
        );
        assert_eq!(
            OperatorCommand::DisableCharging.gatt_intent(),
            Some(GattIntent::Charge(ChargeChange::Disable))
        );
        assert_eq!(OperatorCommand::Connect.gatt_intent(), None);
        assert_eq!(OperatorCommand::StartDynamicPolling.gatt_intent(), None);
    }

    #[test]
    fn test_help_lists_every_key() {
        for key in ['h', 'z', 'c', 'd', 'v', 's', '1', '5', '9'] {
            assert!(HELP_TEXT.contains(&format!("'{}'", key)));
        }
    }
}
