//! Power management policy.
//!
//! Evaluated once per loop iteration. While the radio has scheduled work
//! (scanning or connected) the CPU sleeps as deeply as still lets it service
//! the next radio event. When the scan window ends with nothing to connect
//! to, the platform hibernates until the operator wakes it.

use tracing::{debug, info};

use crate::ble::stack::{LinkState, PowerControl, RadioActivity, RadioSleepMode};

/// Sleep depth chosen for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SleepDepth {
    /// Keep running.
    #[default]
    Awake,
    /// CPU sleep until the next interrupt; the radio keeps its schedule.
    CpuSleep,
    /// Indefinite halt until an external wake.
    Hibernate,
}

impl std::fmt::Display for SleepDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Awake => write!(f, "Awake"),
            Self::CpuSleep => write!(f, "CpuSleep"),
            Self::Hibernate => write!(f, "Hibernate"),
        }
    }
}

/// Decide whether the CPU may sleep given what the radio did with a
/// deep-sleep request.
pub fn cpu_sleep_depth(granted: RadioSleepMode, activity: RadioActivity) -> SleepDepth {
    let may_sleep = match granted {
        // Radio is parked: sleep only if it is still parked or waiting on the crystal
        RadioSleepMode::DeepSleep => {
            matches!(activity, RadioActivity::EcoOn | RadioActivity::DeepSleep)
        }
        // Radio busy: sleep unless Tx/Rx is just closing and needs servicing
        RadioSleepMode::Sleep | RadioSleepMode::Active => activity != RadioActivity::EventClose,
    };

    if may_sleep {
        SleepDepth::CpuSleep
    } else {
        SleepDepth::Awake
    }
}

/// Per-iteration sleep policy.
#[derive(Debug, Clone, Default)]
pub struct PowerPolicy {
    last: SleepDepth,
    hibernations: u32,
}

impl PowerPolicy {
    /// Create a policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth chosen on the previous evaluation.
    pub fn last_depth(&self) -> SleepDepth {
        self.last
    }

    /// Number of times hibernation was entered.
    pub fn hibernations(&self) -> u32 {
        self.hibernations
    }

    /// Choose and apply this iteration's sleep depth.
    ///
    /// `idle_requested` is set when the scan window ended with no connect
    /// intent; it takes precedence over per-iteration sleep.
    pub fn evaluate<P: PowerControl + ?Sized>(
        &mut self,
        power: &mut P,
        link: LinkState,
        idle_requested: bool,
    ) -> SleepDepth {
        let depth = if idle_requested && !link.has_radio_activity() {
            info!("Hibernate");
            self.hibernations += 1;
            power.hibernate();
            SleepDepth::Hibernate
        } else if link.has_radio_activity() {
            let granted = power.request_radio_deep_sleep();
            let depth = cpu_sleep_depth(granted, power.radio_activity());
            if depth == SleepDepth::CpuSleep {
                power.cpu_sleep();
            }
            depth
        } else {
            SleepDepth::Awake
        };

        if depth != self.last {
            debug!("Power: {} -> {}", self.last, depth);
            self.last = depth;
        }
        depth
    }
}

/// [`PowerControl`] for hosts, where the async runtime does the sleeping.
///
/// Hibernation is entered by the loop, which then blocks on operator input.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPower;

impl PowerControl for HostPower {
    fn request_radio_deep_sleep(&mut self) -> RadioSleepMode {
        RadioSleepMode::Active
    }

    fn radio_activity(&self) -> RadioActivity {
        RadioActivity::EventClose
    }

    fn cpu_sleep(&mut self) {}

    fn hibernate(&mut self) {
        info!("Press any key to wake up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::stack::MockPowerControl;

    #[test]
    fn test_cpu_sleep_depth() {
        use RadioActivity::*;
        use RadioSleepMode as Mode;

        assert_eq!(cpu_sleep_depth(Mode::DeepSleep, EcoOn), SleepDepth::CpuSleep);
        assert_eq!(cpu_sleep_depth(Mode::DeepSleep, DeepSleep), SleepDepth::CpuSleep);
        assert_eq!(cpu_sleep_depth(Mode::DeepSleep, EventActive), SleepDepth::Awake);
        assert_eq!(cpu_sleep_depth(Mode::Sleep, EventActive), SleepDepth::CpuSleep);
        assert_eq!(cpu_sleep_depth(Mode::Active, EventClose), SleepDepth::Awake);
    }

    #[test]
    fn test_scanning_sleeps_cpu() {
        let mut power = MockPowerControl::new();
        power
            .expect_request_radio_deep_sleep()
            .times(1)
            .return_const(RadioSleepMode::DeepSleep);
        power
            .expect_radio_activity()
            .times(1)
            .return_const(RadioActivity::EcoOn);
        power.expect_cpu_sleep().times(1).return_const(());
        power.expect_hibernate().never();

        let mut policy = PowerPolicy::new();
        let depth = policy.evaluate(&mut power, LinkState::Scanning, false);
        assert_eq!(depth, SleepDepth::CpuSleep);
        assert_eq!(policy.last_depth(), SleepDepth::CpuSleep);
    }

    #[test]
    fn test_idle_request_hibernates() {
        let mut power = MockPowerControl::new();
        power.expect_hibernate().times(1).return_const(());
        power.expect_request_radio_deep_sleep().never();

        let mut policy = PowerPolicy::new();
        let depth = policy.evaluate(&mut power, LinkState::Disconnected, true);
        assert_eq!(depth, SleepDepth::Hibernate);
        assert_eq!(policy.hibernations(), 1);
    }

    #[test]
    fn test_idle_request_ignored_while_radio_busy() {
        let mut power = MockPowerControl::new();
        power.expect_hibernate().never();
        power
            .expect_request_radio_deep_sleep()
            .return_const(RadioSleepMode::Active);
        power
            .expect_radio_activity()
            .return_const(RadioActivity::EventClose);

        let mut policy = PowerPolicy::new();
        let depth = policy.evaluate(&mut power, LinkState::Connected, true);
        assert_eq!(depth, SleepDepth::Awake);
    }

    #[test]
    fn test_no_radio_activity_stays_awake() {
        let mut power = MockPowerControl::new();
        power.expect_request_radio_deep_sleep().never();
        power.expect_cpu_sleep().never();

        let mut policy = PowerPolicy::new();
        assert_eq!(
            policy.evaluate(&mut power, LinkState::Connecting, false),
            SleepDepth::Awake
        );
    }

    #[test]
    fn test_host_power_never_sleeps_cpu() {
        let mut power = HostPower;
        let mut policy = PowerPolicy::new();

        assert_eq!(
            policy.evaluate(&mut power, LinkState::Scanning, false),
            SleepDepth::Awake
        );
        assert_eq!(
            policy.evaluate(&mut power, LinkState::Disconnected, true),
            SleepDepth::Hibernate
        );
    }
}
