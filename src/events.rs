//! Typed hardware events delivered by the transport.
//!
//! The transport (out of scope here) is expected to decode its wire format
//! into these types and push them onto the sequencer's event queue. Events
//! of the same device class are assumed to arrive in real-world occurrence
//! order; the sequencer neither reorders nor buffers them.

use serde::{Deserialize, Serialize};

/// One hardware event notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Firmware/hardware/software versions and the unique device id.
    VersionInfo(VersionInfo),
    /// Periodic core sensor frame (currents, battery, analog inputs).
    SensorCore(SensorCoreFrame),
    /// Docking station IR receiver signals.
    DockBeacon(DockBeaconFrame),
    /// Gyroscope orientation sample.
    Gyro(GyroSample),
    /// Function button transition.
    Button(ButtonEvent),
    /// Bumper transition.
    Bumper(BumperEvent),
    /// Wheel-drop sensor transition.
    WheelDrop(WheelDropEvent),
    /// Cliff sensor transition.
    Cliff(CliffEvent),
    /// Power system notification.
    Power(PowerEvent),
    /// Digital input levels snapshot.
    DigitalInput(DigitalInputFrame),
    /// Full diagnostics array.
    Diagnostics(DiagnosticsArray),
    /// Top-level health status report.
    Health(HealthLevel),
    /// Robot came online or went offline.
    Connection(ConnectionEvent),
}

/// Version information, published once per connection (latched).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Unique device identifier.
    pub udid: [u32; 3],
    /// Hardware version, bytes encoding major.minor.patch.
    pub hardware: u32,
    /// Firmware version.
    pub firmware: u32,
    /// Software version.
    pub software: u32,
}

impl VersionInfo {
    /// Stable serial-number rendering of the unique device id.
    pub fn serial(&self) -> String {
        format!(
            "{:08x}-{:08x}-{:08x}",
            self.udid[0], self.udid[1], self.udid[2]
        )
    }
}

/// Periodic frame from the robot's core sensor cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorCoreFrame {
    /// Left/right motor current readings.
    pub motor_currents: [u8; 2],
    /// True while an external power source is charging the battery.
    pub charging: bool,
    /// Battery voltage, in tenths of a volt.
    pub battery: u8,
    /// Analog input levels, in millivolts.
    pub analog_inputs: [u16; 4],
}

/// Signal strengths seen by the three docking IR receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockBeaconFrame {
    /// Left, center, right receiver signals; zero means nothing received.
    pub signals: [u8; 3],
}

/// A single gyroscope orientation sample.
#[derive(Debug, Clone, PartialEq)]
pub struct GyroSample {
    /// Heading, in radians.
    pub yaw: f64,
}

/// Function button identifiers, left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Button {
    /// Leftmost function button; accepts operator-judged tests.
    B0,
    /// Middle function button.
    B1,
    /// Rightmost function button; rejects operator-judged tests.
    B2,
}

impl Button {
    /// Positional index, left to right.
    pub fn index(self) -> usize {
        match self {
            Button::B0 => 0,
            Button::B1 => 1,
            Button::B2 => 2,
        }
    }
}

/// Pressed/released transition shared by buttons and bumpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressState {
    /// Contact closed.
    Pressed,
    /// Contact opened.
    Released,
}

/// A function button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Which button changed.
    pub button: Button,
    /// New state.
    pub state: PressState,
}

/// Bumper segment identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bumper {
    /// Left bumper segment.
    Left,
    /// Center bumper segment.
    Center,
    /// Right bumper segment.
    Right,
}

/// A bumper transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BumperEvent {
    /// Which segment changed.
    pub bumper: Bumper,
    /// New state.
    pub state: PressState,
}

/// Left/right wheel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wheel {
    /// Left wheel.
    Left,
    /// Right wheel.
    Right,
}

/// Wheel-drop sensor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelState {
    /// Wheel extended, off the ground.
    Dropped,
    /// Wheel bearing weight.
    Raised,
}

/// A wheel-drop sensor transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelDropEvent {
    /// Which wheel changed.
    pub wheel: Wheel,
    /// New state.
    pub state: WheelState,
}

/// Cliff sensor identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CliffSensor {
    /// Left-facing sensor.
    Left,
    /// Center sensor.
    Center,
    /// Right-facing sensor.
    Right,
}

/// Cliff sensor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliffState {
    /// Floor dropped away under the sensor.
    Cliff,
    /// Floor visible again.
    Floor,
}

/// A cliff sensor transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliffEvent {
    /// Which sensor changed.
    pub sensor: CliffSensor,
    /// New state.
    pub state: CliffState,
}

/// Power system notifications.
///
/// Unplug events do not identify which source was removed; the matcher
/// infers it from the stage under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// DC adapter plugged in.
    PluggedToAdapter,
    /// Robot seated on the docking base.
    PluggedToDock,
    /// External power removed (source unknown).
    Unplugged,
    /// Battery reached full charge.
    ChargeCompleted,
    /// Battery low notice.
    BatteryLow,
    /// Battery critical notice.
    BatteryCritical,
}

impl PowerEvent {
    /// Notifications that carry no plugging information and are never
    /// treated as protocol violations.
    pub fn is_benign_notice(self) -> bool {
        matches!(
            self,
            PowerEvent::ChargeCompleted | PowerEvent::BatteryLow | PowerEvent::BatteryCritical
        )
    }
}

/// Snapshot of the four digital input levels.
///
/// Inputs are pulled high; a `false` level means the channel is asserted
/// (test-board button held down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalInputFrame {
    /// Channel levels, lowest channel first.
    pub levels: [bool; 4],
}

impl DigitalInputFrame {
    /// Lowest asserted channel, if any.
    pub fn first_asserted(&self) -> Option<usize> {
        self.levels.iter().position(|level| !level)
    }
}

/// One diagnostics entry from the robot's self-reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticStatus {
    /// Reporting device name.
    pub name: String,
    /// Severity of this entry.
    pub level: HealthLevel,
    /// Human-readable message.
    pub message: String,
    /// Key/value detail pairs.
    pub values: Vec<(String, String)>,
}

/// A full diagnostics array snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsArray {
    /// All current diagnostic entries.
    pub statuses: Vec<DiagnosticStatus>,
}

impl DiagnosticsArray {
    /// Render the snapshot as the free-text block stored on the ledger.
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for status in &self.statuses {
            let _ = writeln!(out, "Device: {}", status.name);
            let _ = writeln!(out, "Level: {:?}", status.level);
            let _ = writeln!(out, "Message: {}", status.message);
            for (key, value) in &status.values {
                let _ = writeln!(out, "   {key}: {value}");
            }
        }
        out
    }
}

/// Robot-reported health level, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum HealthLevel {
    /// Everything nominal.
    #[default]
    Ok,
    /// Degraded but operating.
    Warn,
    /// Fault reported.
    Error,
}

/// Robot connection notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A robot appeared on the transport.
    Online,
    /// The robot disappeared from the transport.
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_rendering_is_stable() {
        let info = VersionInfo {
            udid: [0x1234, 0xabcd, 0x42],
            hardware: 0,
            firmware: 0,
            software: 0,
        };
        assert_eq!(info.serial(), "00001234-0000abcd-00000042");
    }

    #[test]
    fn test_first_asserted_is_lowest_low_channel() {
        let frame = DigitalInputFrame {
            levels: [true, false, false, true],
        };
        assert_eq!(frame.first_asserted(), Some(1));
        let idle = DigitalInputFrame {
            levels: [true; 4],
        };
        assert_eq!(idle.first_asserted(), None);
    }

    #[test]
    fn test_health_severity_order() {
        assert!(HealthLevel::Ok < HealthLevel::Warn);
        assert!(HealthLevel::Warn < HealthLevel::Error);
    }
}
