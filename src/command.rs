//! Command queue and flow control.
//!
//! The link allows one attribute-protocol request in flight. Operator and
//! automatically generated operations share that single slot: each side
//! can park one intent, the operator's is always drained first, and nothing
//! is issued while a response is outstanding.

use bytes::Bytes;
use tracing::debug;

use crate::ble::characteristics::{AttributeTarget, CccdChange, ChargeChange, WptCharacteristic};
use crate::error::{Error, Result};

/// Who asked for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Typed by the operator.
    Operator,
    /// Generated by the core (discovery completion, fast path, ticker).
    Auto,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// An attribute-protocol operation waiting for the link to be free.
///
/// Intents are resolved against the session (handles, shadows) only when
/// they are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattIntent {
    /// Full service / characteristic discovery.
    Discover,
    /// Read a characteristic value.
    Read(WptCharacteristic),
    /// Update the PRU Alert CCCD.
    AlertCccd(CccdChange),
    /// Write the PRU Control charge enables.
    Charge(ChargeChange),
}

impl std::fmt::Display for GattIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "discover services"),
            Self::Read(c) => write!(f, "read {}", c),
            Self::AlertCccd(CccdChange::EnableNotifications) => {
                write!(f, "enable alert notifications")
            }
            Self::AlertCccd(CccdChange::EnableIndications) => write!(f, "enable alert indications"),
            Self::AlertCccd(CccdChange::Disable) => write!(f, "disable alert notifications/indications"),
            Self::Charge(ChargeChange::Enable) => write!(f, "enable charging"),
            Self::Charge(ChargeChange::Disable) => write!(f, "disable charging"),
        }
    }
}

/// Attribute-protocol operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Service and characteristic discovery.
    DiscoverServices,
    /// Characteristic read.
    ReadCharacteristic,
    /// Characteristic write.
    WriteCharacteristic,
    /// CCCD write enabling notifications, or clearing the mask.
    SetNotifyDescriptor,
    /// CCCD write enabling indications.
    SetIndicateDescriptor,
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DiscoverServices => write!(f, "discover-services"),
            Self::ReadCharacteristic => write!(f, "read-characteristic"),
            Self::WriteCharacteristic => write!(f, "write-characteristic"),
            Self::SetNotifyDescriptor => write!(f, "set-notify-descriptor"),
            Self::SetIndicateDescriptor => write!(f, "set-indicate-descriptor"),
        }
    }
}

/// The request currently awaiting a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Operation kind.
    pub opcode: Opcode,
    /// Target attribute; `None` for discovery.
    pub target: Option<AttributeTarget>,
    /// Written bytes, for writes only.
    pub payload: Option<Bytes>,
    /// Whether the core generated it.
    pub auto_generated: bool,
}

impl PendingCommand {
    /// Create a command without payload.
    pub fn new(opcode: Opcode, target: Option<AttributeTarget>, origin: Origin) -> Self {
        Self {
            opcode,
            target,
            payload: None,
            auto_generated: origin == Origin::Auto,
        }
    }

    /// Attach a write payload.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl std::fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some(target) = &self.target {
            write!(f, " {}", target)?;
        }
        if self.auto_generated {
            write!(f, " [auto]")?;
        }
        Ok(())
    }
}

/// Two-slot intent queue guarded by the single-outstanding-request gate.
#[derive(Debug, Clone, Default)]
pub struct FlowController {
    awaiting: Option<PendingCommand>,
    operator: Option<GattIntent>,
    auto: Option<GattIntent>,
}

impl FlowController {
    /// Create an idle controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a response is outstanding.
    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting.is_some()
    }

    /// The request currently awaiting a response.
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.awaiting.as_ref()
    }

    /// Check if an intent is parked in the slot for `origin`.
    pub fn has_queued(&self, origin: Origin) -> bool {
        match origin {
            Origin::Operator => self.operator.is_some(),
            Origin::Auto => self.auto.is_some(),
        }
    }

    /// Park an intent until the link is free.
    ///
    /// The operator slot holds a single intent; a second one is refused.
    /// The auto slot keeps only the most recent intent.
    pub fn submit(&mut self, intent: GattIntent, origin: Origin) -> Result<()> {
        match origin {
            Origin::Operator => {
                if self.operator.is_some() {
                    return Err(Error::Busy);
                }
                self.operator = Some(intent);
            }
            Origin::Auto => {
                if let Some(previous) = self.auto.replace(intent) {
                    debug!("Auto intent '{}' superseded by '{}'", previous, intent);
                }
            }
        }
        Ok(())
    }

    /// Take the next intent to issue, operator first.
    ///
    /// Returns `None` while a response is outstanding; parked intents stay
    /// where they are.
    pub fn next_ready(&mut self) -> Option<(GattIntent, Origin)> {
        if self.awaiting.is_some() {
            return None;
        }
        if let Some(intent) = self.operator.take() {
            return Some((intent, Origin::Operator));
        }
        self.auto.take().map(|intent| (intent, Origin::Auto))
    }

    /// Close the gate on an issued request.
    pub fn begin(&mut self, command: PendingCommand) {
        debug!("Awaiting response to {}", command);
        self.awaiting = Some(command);
    }

    /// Open the gate; returns the request that was outstanding.
    pub fn complete(&mut self) -> Option<PendingCommand> {
        self.awaiting.take()
    }

    /// Discard the parked auto intent.
    pub fn clear_auto(&mut self) -> Option<GattIntent> {
        self.auto.take()
    }

    /// Force-clear the gate and both slots.
    pub fn reset(&mut self) {
        if let Some(pending) = self.awaiting.take() {
            debug!("Dropping outstanding {}", pending);
        }
        self.operator = None;
        self.auto = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn read_static() -> GattIntent {
        GattIntent::Read(WptCharacteristic::PruStatic)
    }

    fn read_dynamic() -> GattIntent {
        GattIntent::Read(WptCharacteristic::PruDynamic)
    }

    fn pending(origin: Origin) -> PendingCommand {
        PendingCommand::new(Opcode::ReadCharacteristic, None, origin)
    }

    #[test]
    fn test_operator_drained_before_auto() {
        let mut flow = FlowController::new();
        flow.submit(read_dynamic(), Origin::Auto).unwrap();
        flow.submit(read_static(), Origin::Operator).unwrap();

        assert_eq!(flow.next_ready(), Some((read_static(), Origin::Operator)));
        assert_eq!(flow.next_ready(), Some((read_dynamic(), Origin::Auto)));
        assert_eq!(flow.next_ready(), None);
    }

    #[test]
    fn test_gate_holds_intents() {
        let mut flow = FlowController::new();
        flow.begin(pending(Origin::Operator));
        flow.submit(GattIntent::Charge(ChargeChange::Disable), Origin::Operator)
            .unwrap();

        assert!(flow.is_awaiting_response());
        assert_eq!(flow.next_ready(), None);
        assert!(flow.has_queued(Origin::Operator));

        assert!(flow.complete().is_some());
        assert_eq!(
            flow.next_ready(),
            Some((GattIntent::Charge(ChargeChange::Disable), Origin::Operator))
        );
    }

    #[test]
    fn test_second_operator_intent_is_busy() {
        let mut flow = FlowController::new();
        flow.begin(pending(Origin::Operator));
        flow.submit(read_static(), Origin::Operator).unwrap();

        assert!(matches!(
            flow.submit(read_dynamic(), Origin::Operator),
            Err(Error::Busy)
        ));
    }

    #[test]
    fn test_auto_slot_keeps_latest() {
        let mut flow = FlowController::new();
        flow.submit(GattIntent::Discover, Origin::Auto).unwrap();
        flow.submit(read_static(), Origin::Auto).unwrap();

        assert_eq!(flow.next_ready(), Some((read_static(), Origin::Auto)));
        assert_eq!(flow.next_ready(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut flow = FlowController::new();
        flow.begin(pending(Origin::Auto));
        flow.submit(read_static(), Origin::Operator).unwrap();
        flow.submit(read_dynamic(), Origin::Auto).unwrap();

        flow.reset();

        assert!(!flow.is_awaiting_response());
        assert!(!flow.has_queued(Origin::Operator));
        assert!(!flow.has_queued(Origin::Auto));
        assert_eq!(flow.next_ready(), None);
    }

    #[test]
    fn test_pending_command_display() {
        let command = PendingCommand::new(Opcode::ReadCharacteristic, None, Origin::Auto);
        assert_eq!(command.to_string(), "read-characteristic [auto]");
        assert!(command.auto_generated);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Submit(Origin),
        Issue,
        Respond,
        LinkLost,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Submit(Origin::Operator)),
            Just(Step::Submit(Origin::Auto)),
            Just(Step::Issue),
            Just(Step::Respond),
            Just(Step::LinkLost),
        ]
    }

    proptest! {
        #[test]
        fn prop_never_two_outstanding(steps in proptest::collection::vec(step(), 0..128)) {
            let mut flow = FlowController::new();
            let mut outstanding = 0usize;

            for step in steps {
                match step {
                    Step::Submit(origin) => {
                        let _ = flow.submit(read_dynamic(), origin);
                    }
                    Step::Issue => {
                        if let Some((_, origin)) = flow.next_ready() {
                            prop_assert_eq!(outstanding, 0);
                            flow.begin(pending(origin));
                            outstanding += 1;
                        }
                    }
                    Step::Respond => {
                        if flow.complete().is_some() {
                            outstanding -= 1;
                        }
                    }
                    Step::LinkLost => {
                        flow.reset();
                        outstanding = 0;
                    }
                }
                prop_assert!(outstanding <= 1);
                prop_assert_eq!(flow.is_awaiting_response(), outstanding == 1);
            }
        }
    }
}
