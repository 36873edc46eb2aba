//! Expected-sequence matchers.
//!
//! Stateless predicates deciding whether an incoming hardware event is the
//! next event a device's test protocol expects, computed from the current
//! stage and the device's accumulated value only. Everything that does not
//! match is noise: the handlers log it and drop it without touching the
//! ledger.
//!
//! The parity rule for toggled devices (cliff, wheel-drop, power plug): an
//! even accumulated value means the "active" transition (cliff seen, wheel
//! dropped, source plugged) is expected next; odd means the "inactive" one.

use crate::events::{Bumper, Button, CliffSensor, PowerEvent, PressState, Wheel};
use crate::robot::Device;
use crate::steps::{button_for_offset, EvalStep};

/// True when a transition's activeness matches the parity of the
/// accumulated value.
pub fn toggle_matches(active: bool, value: i64) -> bool {
    (value % 2 == 0) == active
}

/// The button and transition expected at a button-test stage.
pub fn expected_button(step: EvalStep) -> Option<(Button, PressState)> {
    if !step.in_button_range() {
        return None;
    }
    let offset = step.offset_from(EvalStep::Button0Pressed)?;
    let button = button_for_offset(offset)?;
    let state = if offset % 2 == 0 {
        PressState::Pressed
    } else {
        PressState::Released
    };
    Some((button, state))
}

/// The bumper and transition expected at a bumper-test stage.
///
/// The pointing stages expect no bumper contact at all; a hit while the
/// robot is turning is a protocol violation.
pub fn expected_bumper(step: EvalStep) -> Option<(Bumper, PressState)> {
    match step {
        EvalStep::CenterBumperPressed => Some((Bumper::Center, PressState::Pressed)),
        EvalStep::CenterBumperReleased => Some((Bumper::Center, PressState::Released)),
        EvalStep::RightBumperPressed => Some((Bumper::Right, PressState::Pressed)),
        EvalStep::RightBumperReleased => Some((Bumper::Right, PressState::Released)),
        EvalStep::LeftBumperPressed => Some((Bumper::Left, PressState::Pressed)),
        EvalStep::LeftBumperReleased => Some((Bumper::Left, PressState::Released)),
        _ => None,
    }
}

/// Ledger entry for a bumper segment.
pub fn bumper_device(bumper: Bumper) -> Device {
    match bumper {
        Bumper::Left => Device::BumperLeft,
        Bumper::Center => Device::BumperCenter,
        Bumper::Right => Device::BumperRight,
    }
}

/// Ledger entry for a function button.
pub fn button_device(button: Button) -> Device {
    match button {
        Button::B0 => Device::Button0,
        Button::B1 => Device::Button1,
        Button::B2 => Device::Button2,
    }
}

/// Ledger entry for a cliff sensor.
pub fn cliff_device(sensor: CliffSensor) -> Device {
    match sensor {
        CliffSensor::Left => Device::CliffLeft,
        CliffSensor::Center => Device::CliffCenter,
        CliffSensor::Right => Device::CliffRight,
    }
}

/// Ledger entry for a wheel-drop sensor.
pub fn wheel_device(wheel: Wheel) -> Device {
    match wheel {
        Wheel::Left => Device::WheelDropLeft,
        Wheel::Right => Device::WheelDropRight,
    }
}

/// The power source under evaluation at a plug-test stage.
pub fn power_device(step: EvalStep) -> Option<Device> {
    match step {
        EvalStep::TestDcAdapter => Some(Device::PowerJack),
        EvalStep::TestDockingBase => Some(Device::PowerDock),
        _ => None,
    }
}

/// Whether a power event is the next expected transition for the source
/// under evaluation.
///
/// A plug event must name the source the stage is testing; an unplug event
/// never identifies its source, so parity alone decides it.
pub fn power_matches(event: PowerEvent, step: EvalStep, value: i64) -> bool {
    match event {
        PowerEvent::PluggedToAdapter => {
            step == EvalStep::TestDcAdapter && toggle_matches(true, value)
        }
        PowerEvent::PluggedToDock => {
            step == EvalStep::TestDockingBase && toggle_matches(true, value)
        }
        PowerEvent::Unplugged => toggle_matches(false, value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_parity() {
        assert!(toggle_matches(true, 0));
        assert!(!toggle_matches(false, 0));
        assert!(toggle_matches(false, 1));
        assert!(!toggle_matches(true, 1));
        assert!(toggle_matches(true, 2));
    }

    #[test]
    fn test_button_positions() {
        assert_eq!(
            expected_button(EvalStep::Button0Pressed),
            Some((Button::B0, PressState::Pressed))
        );
        assert_eq!(
            expected_button(EvalStep::Button0Released),
            Some((Button::B0, PressState::Released))
        );
        assert_eq!(
            expected_button(EvalStep::Button1Pressed),
            Some((Button::B1, PressState::Pressed))
        );
        assert_eq!(
            expected_button(EvalStep::Button2Released),
            Some((Button::B2, PressState::Released))
        );
        assert_eq!(expected_button(EvalStep::TestLeds), None);
    }

    #[test]
    fn test_bumper_table_covers_contact_stages_only() {
        assert_eq!(
            expected_bumper(EvalStep::CenterBumperPressed),
            Some((Bumper::Center, PressState::Pressed))
        );
        assert_eq!(
            expected_bumper(EvalStep::RightBumperReleased),
            Some((Bumper::Right, PressState::Released))
        );
        assert_eq!(
            expected_bumper(EvalStep::LeftBumperPressed),
            Some((Bumper::Left, PressState::Pressed))
        );
        // Turning stages tolerate no contact
        assert_eq!(expected_bumper(EvalStep::PointRightBumper), None);
        assert_eq!(expected_bumper(EvalStep::PointLeftBumper), None);
        assert_eq!(expected_bumper(EvalStep::TestCliffSensors), None);
    }

    #[test]
    fn test_power_matching() {
        use EvalStep::{TestDcAdapter, TestDockingBase};

        assert!(power_matches(PowerEvent::PluggedToAdapter, TestDcAdapter, 0));
        assert!(!power_matches(PowerEvent::PluggedToDock, TestDcAdapter, 0));
        assert!(!power_matches(PowerEvent::PluggedToAdapter, TestDcAdapter, 1));
        assert!(power_matches(PowerEvent::Unplugged, TestDcAdapter, 1));
        assert!(power_matches(PowerEvent::Unplugged, TestDockingBase, 1));
        assert!(!power_matches(PowerEvent::Unplugged, TestDockingBase, 0));
        assert!(power_matches(PowerEvent::PluggedToDock, TestDockingBase, 0));
        assert!(!power_matches(PowerEvent::BatteryLow, TestDcAdapter, 0));
    }
}
