//! Simulated hardware for testing without a robot on the bench.
//!
//! Three pieces:
//!
//! - [`ScriptedEstimator`]: a canned orientation estimator.
//! - [`RecordingConsole`]: an operator console that records every prompt.
//! - [`SimRobot`]: a scripted robot *and* operator. It streams sensor and
//!   gyro frames, reacts to velocity commands with bumper contacts, and
//!   walks a repeating operator routine that exercises every device
//!   protocol (with the occasional stray event the sequencer is expected
//!   to discard). Driving a [`Sequencer`](crate::sequencer::Sequencer)
//!   against it qualifies one simulated robot end to end.
//!
//! All timing uses `tokio::time`, so paused-clock tests run in
//! milliseconds.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, sleep, Instant};
use tracing::info;

use crate::commands::Command;
use crate::events::{
    Bumper, BumperEvent, Button, ButtonEvent, CliffEvent, CliffSensor, CliffState,
    ConnectionEvent, DiagnosticStatus, DiagnosticsArray, DigitalInputFrame, DockBeaconFrame,
    Event, GyroSample, HealthLevel, PowerEvent, PressState, SensorCoreFrame, VersionInfo, Wheel,
    WheelDropEvent, WheelState,
};
use crate::prompt::{OperatorConsole, Severity};
use crate::sequencer::TransportLink;
use crate::vision::YawEstimator;

/// Heading the simulated gyroscope reports, in radians.
pub const SIM_GYRO_YAW: f64 = 0.42;

// =============================================================================
// ScriptedEstimator
// =============================================================================

/// Orientation estimator with a canned answer.
#[derive(Debug)]
pub struct ScriptedEstimator {
    init_fails: bool,
    yaw: Option<f64>,
    polls: u32,
}

impl ScriptedEstimator {
    /// Always reports the given yaw.
    pub fn fixed(yaw: f64) -> Self {
        Self {
            init_fails: false,
            yaw: Some(yaw),
            polls: 0,
        }
    }

    /// Initializes fine but never recognizes the check board.
    pub fn unavailable() -> Self {
        Self {
            init_fails: false,
            yaw: None,
            polls: 0,
        }
    }

    /// Fails at initialization (no camera attached).
    pub fn failing_init() -> Self {
        Self {
            init_fails: true,
            yaw: None,
            polls: 0,
        }
    }

    /// How many samples were requested.
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl YawEstimator for ScriptedEstimator {
    fn init(&mut self, _calibration: &Path, device_index: u32) -> anyhow::Result<()> {
        if self.init_fails {
            anyhow::bail!("no camera at video input {device_index}");
        }
        Ok(())
    }

    fn sample_yaw(&mut self) -> Option<f64> {
        self.polls += 1;
        self.yaw
    }
}

// =============================================================================
// RecordingConsole
// =============================================================================

/// One prompt the sequencer displayed.
#[derive(Debug, Clone)]
pub struct PromptRecord {
    /// Prompt severity.
    pub severity: Severity,
    /// Prompt title.
    pub title: String,
    /// Prompt body.
    pub message: String,
}

#[derive(Debug, Default)]
struct PromptLogInner {
    shown: Vec<PromptRecord>,
    hides: usize,
}

/// Shared view into everything a [`RecordingConsole`] displayed.
#[derive(Debug, Clone, Default)]
pub struct PromptLog(Arc<Mutex<PromptLogInner>>);

impl PromptLog {
    fn lock(&self) -> std::sync::MutexGuard<'_, PromptLogInner> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every prompt shown so far, oldest first.
    pub fn shown(&self) -> Vec<PromptRecord> {
        self.lock().shown.clone()
    }

    /// How many prompts carried the given title.
    pub fn count_titled(&self, title: &str) -> usize {
        self.lock()
            .shown
            .iter()
            .filter(|record| record.title == title)
            .count()
    }

    /// How many times the prompt was dismissed.
    pub fn hides(&self) -> usize {
        self.lock().hides
    }
}

/// Operator console that records prompts instead of displaying them.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    log: PromptLog,
}

impl RecordingConsole {
    /// Create a console plus the log handle to inspect it with.
    pub fn new() -> (Self, PromptLog) {
        let log = PromptLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl OperatorConsole for RecordingConsole {
    fn show_prompt(&mut self, severity: Severity, title: &str, message: &str) {
        self.log.lock().shown.push(PromptRecord {
            severity,
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn hide_prompt(&mut self) {
        self.log.lock().hides += 1;
    }
}

// =============================================================================
// SimRobot
// =============================================================================

/// How long the simulated operator takes to react to robot motion.
const REACTION_DELAY: Duration = Duration::from_millis(300);
/// Cadence of the operator routine.
const OPERATOR_CADENCE: Duration = Duration::from_millis(300);
/// Slots in one operator routine cycle.
const ACTIONS_PER_CYCLE: usize = 32;
/// Cycles that include the full three-button sequence; afterwards only the
/// left button keeps pulsing so a late reject can never race a confirm.
const FULL_BUTTON_CYCLES: usize = 3;
/// Bumper contact order as the qualification drives the robot around.
const BUMPER_ORDER: [Bumper; 3] = [Bumper::Center, Bumper::Right, Bumper::Left];

/// A scripted robot-plus-operator pair on the other end of the transport.
#[derive(Debug)]
pub struct SimRobot {
    session_length: Duration,
    seed: u64,
}

impl SimRobot {
    /// Simulate one bench session of the given length.
    pub fn new(session_length: Duration) -> Self {
        Self {
            session_length,
            seed: 42,
        }
    }

    /// Reseed the stray-event generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// An estimator whose observations agree with the simulated gyroscope
    /// (the camera sees the robot mirrored).
    pub fn matching_estimator(&self) -> ScriptedEstimator {
        ScriptedEstimator::fixed(-SIM_GYRO_YAW)
    }

    /// Run the simulated session over the given transport endpoints.
    pub async fn run(self, link: TransportLink) {
        let TransportLink {
            events,
            mut commands,
        } = link;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let started = Instant::now();
        let finish = started + self.session_length;

        let _ = events.send(Event::Connection(ConnectionEvent::Online));
        sleep(Duration::from_millis(200)).await;
        let _ = events.send(Event::VersionInfo(VersionInfo {
            udid: [0x00c0_ffee, self.seed as u32, 0x2a],
            hardware: 0x0001_0200,
            firmware: 0x0001_0103,
            software: 0x0002_0000,
        }));
        let _ = events.send(Event::Health(HealthLevel::Ok));
        let _ = events.send(Event::Diagnostics(DiagnosticsArray {
            statuses: vec![DiagnosticStatus {
                name: "mobile_base".to_string(),
                level: HealthLevel::Ok,
                message: "all nominal".to_string(),
                values: vec![("Voltage".to_string(), "16.2".to_string())],
            }],
        }));

        let mut state = SimState::new(started);
        let mut sensor_tick = interval(Duration::from_millis(50));
        let mut gyro_tick = interval(Duration::from_millis(100));
        let mut operator_tick = interval(OPERATOR_CADENCE);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => state.on_command(&command),
                    None => break,
                },
                _ = sensor_tick.tick() => {
                    state.flush_pending(&events);
                    let _ = events.send(Event::SensorCore(state.sensor_frame()));
                }
                _ = gyro_tick.tick() => {
                    let _ = events.send(Event::Gyro(GyroSample { yaw: SIM_GYRO_YAW }));
                }
                _ = operator_tick.tick() => state.operator_action(&events, &mut rng),
            }
            if Instant::now() >= finish {
                break;
            }
        }

        let _ = events.send(Event::Connection(ConnectionEvent::Offline));
        info!("Simulated session finished");
    }
}

type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;

#[derive(Debug)]
struct SimState {
    started: Instant,
    analog_override: Option<(u16, Instant)>,
    bumper_index: usize,
    pressed: Option<Bumper>,
    last_sign: i8,
    pending: Vec<(Instant, Event)>,
    action: usize,
}

impl SimState {
    fn new(started: Instant) -> Self {
        Self {
            started,
            analog_override: None,
            bumper_index: 0,
            pressed: None,
            last_sign: 0,
            pending: Vec::new(),
            action: 0,
        }
    }

    /// Core sensor frame: idle motor currents, a slowly charging battery,
    /// and the current analog level on all four channels.
    fn sensor_frame(&self) -> SensorCoreFrame {
        let elapsed = self.started.elapsed().as_secs_f64();
        let battery = (150.0 + elapsed * 0.5).min(250.0) as u8;
        let analog = match self.analog_override {
            Some((level, until)) if Instant::now() < until => level,
            _ => 2000,
        };
        SensorCoreFrame {
            motor_currents: [4, 5],
            charging: true,
            battery,
            analog_inputs: [analog; 4],
        }
    }

    /// Deliver scheduled bumper contacts that have come due.
    fn flush_pending(&mut self, events: &EventSender) {
        let now = Instant::now();
        self.pending.retain(|(due, event)| {
            if *due <= now {
                let _ = events.send(event.clone());
                false
            } else {
                true
            }
        });
    }

    /// React to robot motion: driving forward meets the next wall in the
    /// bumper order, backing off releases the contact.
    fn on_command(&mut self, command: &Command) {
        let Command::Velocity { linear, .. } = command else {
            return;
        };
        let sign = if *linear > 0.01 {
            1
        } else if *linear < -0.01 {
            -1
        } else {
            0
        };

        if sign == 1 && self.last_sign != 1 {
            let bumper = BUMPER_ORDER[self.bumper_index % BUMPER_ORDER.len()];
            self.pressed = Some(bumper);
            self.pending.push((
                Instant::now() + REACTION_DELAY,
                Event::Bumper(BumperEvent {
                    bumper,
                    state: PressState::Pressed,
                }),
            ));
        } else if sign == -1 && self.last_sign != -1 {
            if let Some(bumper) = self.pressed.take() {
                self.bumper_index += 1;
                self.pending.push((
                    Instant::now() + REACTION_DELAY,
                    Event::Bumper(BumperEvent {
                        bumper,
                        state: PressState::Released,
                    }),
                ));
            }
        }
        self.last_sign = sign;
    }

    fn button(events: &EventSender, button: Button, state: PressState) {
        let _ = events.send(Event::Button(ButtonEvent { button, state }));
    }

    /// One slot of the repeating operator routine. Stages not currently
    /// under evaluation simply discard what the routine throws at them.
    fn operator_action(&mut self, events: &EventSender, rng: &mut StdRng) {
        let cycle = self.action / ACTIONS_PER_CYCLE;
        let slot = self.action % ACTIONS_PER_CYCLE;
        self.action += 1;
        let full_buttons = cycle < FULL_BUTTON_CYCLES;

        match slot {
            0 => Self::button(events, Button::B0, PressState::Pressed),
            1 => Self::button(events, Button::B0, PressState::Released),
            2 if full_buttons => Self::button(events, Button::B1, PressState::Pressed),
            3 if full_buttons => Self::button(events, Button::B1, PressState::Released),
            4 if full_buttons => Self::button(events, Button::B2, PressState::Pressed),
            5 if full_buttons => Self::button(events, Button::B2, PressState::Released),
            6 => {
                let _ = events.send(Event::Power(PowerEvent::PluggedToAdapter));
            }
            7 | 9 => {
                let _ = events.send(Event::Power(PowerEvent::Unplugged));
            }
            8 => {
                let _ = events.send(Event::Power(PowerEvent::PluggedToDock));
            }
            10..=15 => {
                let sensors = [CliffSensor::Left, CliffSensor::Center, CliffSensor::Right];
                let sensor = sensors[(slot - 10) / 2];
                let state = if (slot - 10) % 2 == 0 {
                    CliffState::Cliff
                } else {
                    CliffState::Floor
                };
                let _ = events.send(Event::Cliff(CliffEvent { sensor, state }));
            }
            16..=19 => {
                let wheel = if slot < 18 { Wheel::Left } else { Wheel::Right };
                let state = if slot % 2 == 0 {
                    WheelState::Dropped
                } else {
                    WheelState::Raised
                };
                let _ = events.send(Event::WheelDrop(WheelDropEvent { wheel, state }));
            }
            20 | 22 | 24 | 26 => {
                let mut levels = [true; 4];
                levels[(slot - 20) / 2] = false;
                let _ = events.send(Event::DigitalInput(DigitalInputFrame { levels }));
            }
            21 | 23 | 25 | 27 => {
                let _ = events.send(Event::DigitalInput(DigitalInputFrame {
                    levels: [true; 4],
                }));
            }
            28 => {
                let _ = events.send(Event::DockBeacon(DockBeaconFrame {
                    signals: [64, 80, 72],
                }));
            }
            29 => {
                self.analog_override =
                    Some((1, Instant::now() + Duration::from_millis(1200)));
            }
            30 => {
                self.analog_override =
                    Some((4095, Instant::now() + Duration::from_millis(1200)));
            }
            31 => {
                // Stray traffic the sequencer must shrug off
                match rng.gen_range(0..3) {
                    0 => {
                        let _ = events.send(Event::Power(PowerEvent::BatteryLow));
                    }
                    1 => {
                        let _ = events.send(Event::Cliff(CliffEvent {
                            sensor: CliffSensor::Center,
                            state: CliffState::Floor,
                        }));
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}
