//! Per-robot device ledger.
//!
//! `RobotRecord` is the record of one robot under test: identity, health,
//! and one `DeviceReport` per testable device. Reports carry a
//! device-specific `value` (toggle counter, bitmask, accumulated maximum
//! current, measured voltage delta) and an `ok` flag that the API only ever
//! moves from false to true. Nothing here decides *when* a device passes;
//! that is the sequencer's job.

use serde::{Deserialize, Serialize};

use crate::events::HealthLevel;

/// Every testable device on the robot, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum Device {
    /// Version/identity report.
    VersionInfo,
    /// Left docking IR receiver.
    IrDockLeft,
    /// Center docking IR receiver.
    IrDockCenter,
    /// Right docking IR receiver.
    IrDockRight,
    /// Gyroscope (vision cross-checked).
    Imu,
    /// Left function button.
    Button0,
    /// Middle function button.
    Button1,
    /// Right function button.
    Button2,
    /// Left bumper segment.
    BumperLeft,
    /// Center bumper segment.
    BumperCenter,
    /// Right bumper segment.
    BumperRight,
    /// Left wheel-drop sensor.
    WheelDropLeft,
    /// Right wheel-drop sensor.
    WheelDropRight,
    /// Left cliff sensor.
    CliffLeft,
    /// Center cliff sensor.
    CliffCenter,
    /// Right cliff sensor.
    CliffRight,
    /// DC adapter jack.
    PowerJack,
    /// Docking base contacts.
    PowerDock,
    /// Left drive motor.
    MotorLeft,
    /// Right drive motor.
    MotorRight,
    /// Battery charging circuit.
    Charging,
    /// First panel LED.
    Led1,
    /// Second panel LED.
    Led2,
    /// Sound output.
    Sounds,
    /// Digital input bank.
    DigitalInput,
    /// Digital output bank.
    DigitalOutput,
    /// Analog input bank.
    AnalogInput,
}

impl Device {
    /// Number of devices in the ledger.
    pub const COUNT: usize = 27;

    /// Every device, in report order.
    pub const ALL: [Device; Device::COUNT] = [
        Device::VersionInfo,
        Device::IrDockLeft,
        Device::IrDockCenter,
        Device::IrDockRight,
        Device::Imu,
        Device::Button0,
        Device::Button1,
        Device::Button2,
        Device::BumperLeft,
        Device::BumperCenter,
        Device::BumperRight,
        Device::WheelDropLeft,
        Device::WheelDropRight,
        Device::CliffLeft,
        Device::CliffCenter,
        Device::CliffRight,
        Device::PowerJack,
        Device::PowerDock,
        Device::MotorLeft,
        Device::MotorRight,
        Device::Charging,
        Device::Led1,
        Device::Led2,
        Device::Sounds,
        Device::DigitalInput,
        Device::DigitalOutput,
        Device::AnalogInput,
    ];

    /// Stable column name used in result files.
    pub fn name(self) -> &'static str {
        match self {
            Device::VersionInfo => "version_info",
            Device::IrDockLeft => "ir_dock_left",
            Device::IrDockCenter => "ir_dock_center",
            Device::IrDockRight => "ir_dock_right",
            Device::Imu => "gyroscope",
            Device::Button0 => "button_0",
            Device::Button1 => "button_1",
            Device::Button2 => "button_2",
            Device::BumperLeft => "bumper_left",
            Device::BumperCenter => "bumper_center",
            Device::BumperRight => "bumper_right",
            Device::WheelDropLeft => "wheel_drop_left",
            Device::WheelDropRight => "wheel_drop_right",
            Device::CliffLeft => "cliff_left",
            Device::CliffCenter => "cliff_center",
            Device::CliffRight => "cliff_right",
            Device::PowerJack => "power_jack",
            Device::PowerDock => "power_dock",
            Device::MotorLeft => "motor_left",
            Device::MotorRight => "motor_right",
            Device::Charging => "charging",
            Device::Led1 => "led_1",
            Device::Led2 => "led_2",
            Device::Sounds => "sounds",
            Device::DigitalInput => "digital_input",
            Device::DigitalOutput => "digital_output",
            Device::AnalogInput => "analog_input",
        }
    }

    fn idx(self) -> usize {
        self as usize
    }
}

/// Progress record for a single device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceReport {
    /// Device-specific accumulator (counter, bitmask, maximum, delta).
    pub value: i64,
    /// Set exactly once when the device's protocol is satisfied.
    pub ok: bool,
}

/// Firmware/hardware/software version triple, set once per robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTriple {
    /// Hardware version word.
    pub hardware: u32,
    /// Firmware version word.
    pub firmware: u32,
    /// Software version word.
    pub software: u32,
}

fn dotted(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xff,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

impl std::fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            dotted(self.hardware),
            dotted(self.firmware),
            dotted(self.software)
        )
    }
}

/// The two gyroscope/vision sample pairs plus the latest raw yaw.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImuSamples {
    /// Gyroscope yaw at each of the two samples.
    pub yaw: [f64; 2],
    /// Normalized gyro-minus-vision difference at each sample.
    pub diff: [f64; 2],
    /// Most recent raw gyroscope yaw.
    pub latest_yaw: f64,
}

impl ImuSamples {
    /// Record one of the two cross-check samples.
    pub fn record(&mut self, sample: usize, yaw: f64, diff: f64) {
        if let (Some(y), Some(d)) = (self.yaw.get_mut(sample), self.diff.get_mut(sample)) {
            *y = yaw;
            *d = diff;
        }
    }
}

/// Running analog-input statistics and feedback state for one channel.
#[derive(Debug, Clone, Copy)]
pub struct AnalogChannel {
    /// Previous raw sample, millivolts.
    pub previous: u16,
    /// Change since the previous sample.
    pub delta: i32,
    /// Running minimum since the analog test started.
    pub min: u16,
    /// Running maximum since the analog test started.
    pub max: u16,
    /// Minimum threshold crossed at least once.
    pub min_reached: bool,
    /// Maximum threshold crossed at least once.
    pub max_reached: bool,
    /// Ticks the feedback indicator stays lit after the last crossing.
    pub feedback_ticks: u32,
}

impl Default for AnalogChannel {
    fn default() -> Self {
        Self {
            previous: 0,
            delta: 0,
            min: u16::MAX,
            max: 0,
            min_reached: false,
            max_reached: false,
            feedback_ticks: 0,
        }
    }
}

impl AnalogChannel {
    /// Fold in one raw sample.
    pub fn update(&mut self, sample: u16) {
        self.delta = i32::from(sample) - i32::from(self.previous);
        self.previous = sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    /// Both thresholds crossed and the feedback indicator has gone dark.
    pub fn complete(&self) -> bool {
        self.min_reached && self.max_reached && self.feedback_ticks == 0
    }
}

/// Ledger for one robot under test.
#[derive(Debug, Clone)]
pub struct RobotRecord {
    /// Sequential index assigned at creation.
    pub id: usize,
    /// Unique serial, set from the first version-info event.
    pub serial: Option<String>,
    /// Version triple, set once.
    pub version: Option<VersionTriple>,
    /// Robot-reported health, monotonic toward non-OK.
    state: HealthLevel,
    /// Latest diagnostics snapshot, overwritten wholesale.
    pub diagnostics: String,
    devices: [DeviceReport; Device::COUNT],
    /// Gyroscope cross-check samples.
    pub imu: ImuSamples,
    /// Per-channel analog input state.
    pub analog: [AnalogChannel; 4],
}

impl RobotRecord {
    /// Create an empty ledger with the given sequential id.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            serial: None,
            version: None,
            state: HealthLevel::Ok,
            diagnostics: String::new(),
            devices: [DeviceReport::default(); Device::COUNT],
            imu: ImuSamples::default(),
            analog: [AnalogChannel::default(); 4],
        }
    }

    /// Serial number, or a placeholder while none has been reported.
    pub fn serial_or_unknown(&self) -> &str {
        self.serial.as_deref().unwrap_or("<unknown>")
    }

    /// Current health level.
    pub fn state(&self) -> HealthLevel {
        self.state
    }

    /// Raise the health level; a report can never return the robot to OK.
    pub fn degrade(&mut self, level: HealthLevel) {
        self.state = self.state.max(level);
    }

    /// Read one device report.
    pub fn device(&self, device: Device) -> DeviceReport {
        self.devices[device.idx()]
    }

    /// Replace a device's accumulator.
    pub fn set_value(&mut self, device: Device, value: i64) {
        self.devices[device.idx()].value = value;
    }

    /// Increment a device's accumulator by one.
    pub fn bump_value(&mut self, device: Device) -> i64 {
        self.devices[device.idx()].value += 1;
        self.devices[device.idx()].value
    }

    /// Keep the running maximum of a device's accumulator.
    pub fn max_value(&mut self, device: Device, sample: i64) {
        let report = &mut self.devices[device.idx()];
        report.value = report.value.max(sample);
    }

    /// Mark a device's protocol satisfied.
    pub fn pass(&mut self, device: Device) {
        self.devices[device.idx()].ok = true;
    }

    /// Record a verdict; `ok` transitions are one-way, so a false verdict
    /// on an already-passed device is ignored.
    pub fn set_ok(&mut self, device: Device, passed: bool) {
        if passed {
            self.devices[device.idx()].ok = true;
        }
    }

    fn group_ok(&self, devices: &[Device]) -> bool {
        devices.iter().all(|d| self.device(*d).ok)
    }

    /// All three function buttons passed.
    pub fn buttons_ok(&self) -> bool {
        self.group_ok(&[Device::Button0, Device::Button1, Device::Button2])
    }

    /// All three bumper segments passed.
    pub fn bumpers_ok(&self) -> bool {
        self.group_ok(&[
            Device::BumperLeft,
            Device::BumperCenter,
            Device::BumperRight,
        ])
    }

    /// Both wheel-drop sensors passed.
    pub fn wheel_drops_ok(&self) -> bool {
        self.group_ok(&[Device::WheelDropLeft, Device::WheelDropRight])
    }

    /// All three cliff sensors passed.
    pub fn cliffs_ok(&self) -> bool {
        self.group_ok(&[Device::CliffLeft, Device::CliffCenter, Device::CliffRight])
    }

    /// Both power sources passed.
    pub fn power_sources_ok(&self) -> bool {
        self.group_ok(&[Device::PowerJack, Device::PowerDock])
    }

    /// Both drive motors passed.
    pub fn motors_ok(&self) -> bool {
        self.group_ok(&[Device::MotorLeft, Device::MotorRight])
    }

    /// All three docking IR receivers passed.
    pub fn dock_ir_ok(&self) -> bool {
        self.group_ok(&[
            Device::IrDockLeft,
            Device::IrDockCenter,
            Device::IrDockRight,
        ])
    }

    /// Every device on the ledger passed.
    pub fn all_ok(&self) -> bool {
        self.devices.iter().all(|report| report.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_is_one_way() {
        let mut robot = RobotRecord::new(0);
        robot.pass(Device::BumperLeft);
        assert!(robot.device(Device::BumperLeft).ok);
        robot.set_ok(Device::BumperLeft, false);
        assert!(robot.device(Device::BumperLeft).ok);
    }

    #[test]
    fn test_health_never_recovers() {
        let mut robot = RobotRecord::new(0);
        robot.degrade(HealthLevel::Warn);
        robot.degrade(HealthLevel::Ok);
        assert_eq!(robot.state(), HealthLevel::Warn);
        robot.degrade(HealthLevel::Error);
        robot.degrade(HealthLevel::Warn);
        assert_eq!(robot.state(), HealthLevel::Error);
    }

    #[test]
    fn test_group_queries() {
        let mut robot = RobotRecord::new(0);
        assert!(!robot.buttons_ok());
        robot.pass(Device::Button0);
        robot.pass(Device::Button1);
        assert!(!robot.buttons_ok());
        robot.pass(Device::Button2);
        assert!(robot.buttons_ok());
        assert!(!robot.all_ok());
    }

    #[test]
    fn test_all_ok_requires_every_device() {
        let mut robot = RobotRecord::new(0);
        for device in Device::ALL {
            robot.pass(device);
        }
        assert!(robot.all_ok());
    }

    #[test]
    fn test_analog_channel_statistics() {
        let mut channel = AnalogChannel::default();
        channel.update(2000);
        channel.update(1500);
        assert_eq!(channel.delta, -500);
        assert_eq!(channel.min, 1500);
        assert_eq!(channel.max, 2000);
        channel.update(4095);
        assert_eq!(channel.max, 4095);
        assert_eq!(channel.min, 1500);
    }

    #[test]
    fn test_analog_complete_waits_for_feedback() {
        let mut channel = AnalogChannel {
            min_reached: true,
            max_reached: true,
            feedback_ticks: 2,
            ..AnalogChannel::default()
        };
        assert!(!channel.complete());
        channel.feedback_ticks = 0;
        assert!(channel.complete());
    }

    #[test]
    fn test_version_display() {
        let triple = VersionTriple {
            hardware: 0x01_02_03,
            firmware: 0x01_00_00,
            software: 0x02_01_00,
        };
        assert_eq!(triple.to_string(), "1.2.3/1.0.0/2.1.0");
    }
}
