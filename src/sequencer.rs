//! The qualification state machine.
//!
//! A single task owns everything: it drains the transport's event queue
//! strictly at the top of every scheduler tick, dispatches each event to
//! the handler for its device class, and then performs the per-tick action
//! of the current stage. Handlers update the ledger and advance the stage
//! when a device's protocol completes; tick actions issue prompts and
//! motion and run the synchronous sub-tests (motor evaluation, gyroscope
//! cross-check, charge measurement) to completion before advancing.
//!
//! Long sub-tests never starve the queue: they wait in tick-sized slices
//! through [`Sequencer::settle`], draining events on every slice, so a
//! charger-plugged frame or a gyro sample arriving mid-wait still lands in
//! shared state the sub-test is watching. After every slice the sub-test
//! re-checks that the robot still exists and the stage is unchanged, and
//! bails out if a session event pulled the robot away.
//!
//! While a timed maneuver is in flight all stage actions are skipped;
//! events keep draining, and the expired deadline stops the robot and
//! advances the stage.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::commands::{Command, CommandBus, LedColor, Sound};
use crate::config::Settings;
use crate::error::QcResult;
use crate::events::{
    Button, ButtonEvent, BumperEvent, CliffEvent, CliffState, ConnectionEvent, DiagnosticsArray,
    DigitalInputFrame, DockBeaconFrame, Event, GyroSample, HealthLevel, PowerEvent, PressState,
    SensorCoreFrame, VersionInfo, WheelDropEvent, WheelState,
};
use crate::matchers;
use crate::motion::MotionController;
use crate::prompt::{OperatorConsole, Severity};
use crate::report::ReportWriter;
use crate::robot::{AnalogChannel, Device, VersionTriple};
use crate::session::SessionManager;
use crate::steps::EvalStep;
use crate::vision::{normalize_angle, samples_agree, YawEstimator};

// Maneuver parameters: linear speeds in m/s, angular in rad/s.
const MOTORS_LIN_SPEED: f64 = 0.2;
const MOTORS_ANG_SPEED: f64 = FRAC_PI_2;
const MOTORS_DISTANCE: f64 = 0.4; // m
const MOTORS_TURN: f64 = PI; // rad
const BUMPER_LIN_SPEED: f64 = 0.1;
const BUMPER_ANG_SPEED: f64 = PI / 5.0;
const GYRO_ANG_SPEED: f64 = PI / 3.0;
const GYRO_TURN: f64 = 2.0 * PI;
const BUMPER_RETREAT_TIME: Duration = Duration::from_millis(1500);
const BUMPER_LAUNCH_DELAY: Duration = Duration::from_millis(1500);

/// The channel endpoints the host's transport glue drives.
#[derive(Debug)]
pub struct TransportLink {
    /// Push decoded hardware events here.
    pub events: mpsc::UnboundedSender<Event>,
    /// Drain outgoing actuation commands from here.
    pub commands: mpsc::UnboundedReceiver<Command>,
}

/// The qualification state machine.
pub struct Sequencer {
    settings: Settings,
    events: mpsc::UnboundedReceiver<Event>,
    commands: CommandBus,
    motion: MotionController,
    session: SessionManager,
    console: Box<dyn OperatorConsole>,
    estimator: Box<dyn YawEstimator>,
    step: EvalStep,
    previous_step: EvalStep,
    answer_required: bool,
    transport_closed: bool,
    ticks: u64,
}

impl Sequencer {
    /// Build a sequencer plus the transport endpoints it talks through.
    pub fn new(
        settings: Settings,
        console: Box<dyn OperatorConsole>,
        estimator: Box<dyn YawEstimator>,
    ) -> (Self, TransportLink) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (commands, command_rx) = CommandBus::new();
        let writer = ReportWriter::new(settings.output.results_file.clone());
        let sequencer = Self {
            motion: MotionController::new(commands.clone()),
            session: SessionManager::new(writer),
            settings,
            events: event_rx,
            commands,
            console,
            estimator,
            step: EvalStep::Initialization,
            previous_step: EvalStep::Initialization,
            answer_required: false,
            transport_closed: false,
            ticks: 0,
        };
        let link = TransportLink {
            events: event_tx,
            commands: command_rx,
        };
        (sequencer, link)
    }

    /// Stage currently under evaluation.
    pub fn current_step(&self) -> EvalStep {
        self.step
    }

    /// Session state: robot under test and evaluated registry.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// An operator answer is outstanding.
    pub fn answer_required(&self) -> bool {
        self.answer_required
    }

    /// Drive the tick loop until the transport closes.
    ///
    /// A robot still under evaluation when the transport goes away is
    /// persisted as an interrupted partial result.
    pub async fn run(&mut self) -> QcResult<()> {
        let period = self.settings.protocol.tick_period();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Qualification sequencer running at {:.1} Hz",
            self.settings.protocol.tick_hz
        );

        loop {
            ticker.tick().await;
            self.step_once().await;
            if self.transport_closed {
                if self.session.active() {
                    warn!("Transport closed mid-evaluation; saving partial results");
                    self.session.finish_current();
                }
                info!("Transport closed; sequencer stopping");
                return Ok(());
            }
        }
    }

    /// One scheduler iteration: drain the event queue, then perform the
    /// current stage's action. Exposed so hosts and tests can drive the
    /// sequencer without the built-in ticker.
    pub async fn step_once(&mut self) {
        self.ticks += 1;
        self.drain_events();
        self.tick_actions().await;
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.transport_closed = true;
                    break;
                }
            }
        }
    }

    /// Sleep in tick-sized slices, draining the event queue on each slice.
    async fn settle(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            self.drain_events();
            let now = Instant::now();
            if now >= deadline || self.transport_closed {
                break;
            }
            let nap = (deadline - now).min(self.settings.protocol.tick_period());
            sleep(nap).await;
        }
        self.drain_events();
    }

    fn advance(&mut self) {
        let next = self.step.next();
        if next != self.step {
            debug!("Step {} -> {}", self.step, next);
            self.step = next;
        }
    }

    /// The sub-test's stage is gone (answered, robot pulled, session
    /// replaced, transport closed); any cooperative wait must abort.
    fn stage_lost(&self, stage: EvalStep) -> bool {
        self.step != stage || !self.session.active() || self.transport_closed
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connection(event) => self.on_connection(event),
            Event::VersionInfo(info) => self.on_version_info(info),
            Event::SensorCore(frame) => self.on_sensor_core(frame),
            Event::DockBeacon(frame) => self.on_dock_beacon(frame),
            Event::Gyro(sample) => self.on_gyro(sample),
            Event::Button(event) => self.on_button(event),
            Event::Bumper(event) => self.on_bumper(event),
            Event::WheelDrop(event) => self.on_wheel_drop(event),
            Event::Cliff(event) => self.on_cliff(event),
            Event::Power(event) => self.on_power(event),
            Event::DigitalInput(frame) => self.on_digital_input(frame),
            Event::Diagnostics(array) => self.on_diagnostics(array),
            Event::Health(level) => self.on_health(level),
        }
    }

    fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Online => {
                self.session.begin();
                self.step = EvalStep::Initialization;
                self.previous_step = EvalStep::Initialization;
                self.answer_required = false;
                self.motion.halt();
            }
            ConnectionEvent::Offline => {
                if let Some(robot) = self.session.robot() {
                    if robot.all_ok() {
                        info!(
                            "Robot {} evaluation successfully completed",
                            robot.serial_or_unknown()
                        );
                    } else {
                        info!(
                            "Robot {} disconnected without finishing the evaluation",
                            robot.serial_or_unknown()
                        );
                    }
                    self.session.finish_current();
                    self.answer_required = false;
                    self.motion.halt();
                } else {
                    warn!("Robot offline event received, but no robot is under evaluation");
                }
            }
        }
    }

    fn on_version_info(&mut self, info: VersionInfo) {
        let serial = info.serial();
        {
            let Some(robot) = self.session.robot_mut() else {
                return;
            };
            if robot.device(Device::VersionInfo).ok {
                if robot.serial.as_deref() == Some(serial.as_str()) {
                    debug!("Version info received more than once for {serial}");
                    return;
                }
                // The driver can republish identity late after a robot swap;
                // trust the newer report.
                warn!(
                    "Overwriting version info: old SN: {} / new SN: {}",
                    robot.serial_or_unknown(),
                    serial
                );
            }
            robot.serial = Some(serial.clone());
        }

        if self.session.already_evaluated(&serial) {
            self.console.show_prompt(
                Severity::Error,
                "Known robot",
                &format!("Robot {serial} has been previously evaluated. Proceed with a new robot"),
            );
            self.session.reject_current();
            return;
        }

        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        let version = VersionTriple {
            hardware: info.hardware,
            firmware: info.firmware,
            software: info.software,
        };
        robot.version = Some(version);
        robot.pass(Device::VersionInfo);
        info!("UDID: {serial}. Hardware/firmware/software version: {version}");
    }

    fn on_sensor_core(&mut self, frame: SensorCoreFrame) {
        let step = self.step;
        let Some(robot) = self.session.robot_mut() else {
            return;
        };

        if step.in_motor_range() {
            robot.max_value(Device::MotorLeft, i64::from(frame.motor_currents[0]));
            robot.max_value(Device::MotorRight, i64::from(frame.motor_currents[1]));
            return;
        }

        if step == EvalStep::MeasureCharging && frame.charging {
            robot.set_value(Device::Charging, i64::from(frame.battery));
            return;
        }

        if step == EvalStep::TestAnalogInput {
            for (channel, sample) in robot.analog.iter_mut().zip(frame.analog_inputs) {
                channel.update(sample);
            }
        }
    }

    fn on_dock_beacon(&mut self, frame: DockBeaconFrame) {
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        if robot.dock_ir_ok() {
            return;
        }

        // Readings are collected at any stage; the emitter array covers the
        // whole bench.
        let receivers = [
            Device::IrDockLeft,
            Device::IrDockCenter,
            Device::IrDockRight,
        ];
        for (device, signal) in receivers.into_iter().zip(frame.signals) {
            if signal > 0 {
                robot.set_value(device, i64::from(signal));
                robot.pass(device);
            }
        }

        if robot.dock_ir_ok() {
            info!(
                "Docking IR receiver evaluation completed: {}/{}/{}",
                robot.device(Device::IrDockLeft).value,
                robot.device(Device::IrDockCenter).value,
                robot.device(Device::IrDockRight).value
            );
        }
    }

    fn on_gyro(&mut self, sample: GyroSample) {
        if let Some(robot) = self.session.robot_mut() {
            robot.imu.latest_yaw = sample.yaw;
        }
    }

    fn on_button(&mut self, event: ButtonEvent) {
        if !self.session.active() {
            return;
        }

        // Operator-judged stages: the left/right function buttons answer the
        // outstanding prompt.
        if self.step.awaits_operator_answer()
            && self.answer_required
            && event.state == PressState::Released
        {
            if matches!(event.button, Button::B0 | Button::B2) {
                let accepted = event.button == Button::B0;
                let stage = self.step;
                if let Some(robot) = self.session.robot_mut() {
                    match stage {
                        EvalStep::TestLeds => {
                            robot.set_ok(Device::Led1, accepted);
                            robot.set_ok(Device::Led2, accepted);
                        }
                        EvalStep::TestSounds => robot.set_ok(Device::Sounds, accepted),
                        EvalStep::TestDigitalIo => {
                            robot.set_ok(Device::DigitalInput, accepted);
                            robot.set_ok(Device::DigitalOutput, accepted);
                        }
                        _ => {}
                    }
                }
                if accepted {
                    info!("{} evaluation completed", stage.judged_label());
                } else {
                    warn!("{} didn't pass the test", stage.judged_label());
                }
                // Disable further input so answers cannot accumulate
                self.answer_required = false;
                self.console.hide_prompt();
                self.advance();
            }
            return;
        }

        let Some(robot) = self.session.robot() else {
            return;
        };
        if robot.buttons_ok() {
            return;
        }

        if !self.step.in_button_range() {
            debug!(
                "Button {:?} {:?}; ignoring",
                event.button, event.state
            );
            return;
        }

        match matchers::expected_button(self.step) {
            Some((button, state)) if button == event.button && state == event.state => {
                info!("Button {:?} {:?}, as expected", event.button, event.state);
                if event.state == PressState::Released {
                    if let Some(robot) = self.session.robot_mut() {
                        robot.pass(matchers::button_device(button));
                    }
                }
                if self.step == EvalStep::Button2Released {
                    info!("Buttons evaluation completed");
                }
                self.advance();
            }
            _ => warn!(
                "Unexpected button event: {:?} {:?}",
                event.button, event.state
            ),
        }
    }

    fn on_bumper(&mut self, event: BumperEvent) {
        {
            let Some(robot) = self.session.robot() else {
                return;
            };
            if robot.bumpers_ok() {
                return;
            }
        }

        if !self.step.in_bumper_range() {
            debug!("Bumper {:?} accidental hit; ignoring", event.bumper);
            return;
        }

        match matchers::expected_bumper(self.step) {
            Some((bumper, state)) if bumper == event.bumper && state == event.state => {
                info!("Bumper {:?} {:?}, as expected", event.bumper, event.state);
                let device = matchers::bumper_device(bumper);
                if let Some(robot) = self.session.robot_mut() {
                    robot.bump_value(device);
                }

                if event.state == PressState::Pressed {
                    // Retreat from the wall; the expiry advances past the
                    // released stage once the bumper clears.
                    self.motion
                        .drive_for(-BUMPER_LIN_SPEED, 0.0, BUMPER_RETREAT_TIME);
                    self.advance();
                } else {
                    if let Some(robot) = self.session.robot_mut() {
                        robot.pass(device);
                        if robot.bumpers_ok() {
                            info!("Bumper evaluation completed");
                        }
                    }
                    self.console.hide_prompt();
                }
            }
            _ => warn!(
                "Unexpected bumper event: {:?} {:?}",
                event.bumper, event.state
            ),
        }
    }

    fn on_wheel_drop(&mut self, event: WheelDropEvent) {
        if !self.session.active() {
            return;
        }
        if self.step != EvalStep::TestWheelDropSensors {
            debug!("Wheel drop event {:?} outside its stage; ignoring", event);
            return;
        }

        let device = matchers::wheel_device(event.wheel);
        let required = i64::from(self.settings.protocol.wheel_drop_repetitions) * 2;
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        if robot.device(device).ok {
            return;
        }

        let active = event.state == WheelState::Dropped;
        if matchers::toggle_matches(active, robot.device(device).value) {
            info!("{:?} wheel {:?}, as expected", event.wheel, event.state);
            if robot.bump_value(device) >= required {
                info!("{:?} wheel drop evaluation completed", event.wheel);
                robot.pass(device);
                if robot.wheel_drops_ok() {
                    self.advance();
                }
            }
        } else {
            warn!(
                "Unexpected wheel drop event: {:?} {:?}",
                event.wheel, event.state
            );
        }
    }

    fn on_cliff(&mut self, event: CliffEvent) {
        if !self.session.active() {
            return;
        }
        if self.step != EvalStep::TestCliffSensors {
            debug!("Cliff event {:?} outside its stage; ignoring", event);
            return;
        }

        let device = matchers::cliff_device(event.sensor);
        let required = i64::from(self.settings.protocol.cliff_repetitions) * 2;
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        if robot.device(device).ok {
            return;
        }

        let active = event.state == CliffState::Cliff;
        if matchers::toggle_matches(active, robot.device(device).value) {
            info!(
                "{:?} cliff sensor reports {:?}, as expected",
                event.sensor, event.state
            );
            if robot.bump_value(device) >= required {
                info!("{:?} cliff sensor evaluation completed", event.sensor);
                robot.pass(device);
                if robot.cliffs_ok() {
                    self.advance();
                }
            }
        } else {
            warn!(
                "Unexpected cliff sensor event: {:?} {:?}",
                event.sensor, event.state
            );
        }
    }

    fn on_power(&mut self, event: PowerEvent) {
        if !self.session.active() {
            return;
        }
        {
            let Some(robot) = self.session.robot() else {
                return;
            };
            if robot.power_sources_ok() {
                return;
            }
        }

        // Battery notices are routine at any stage and carry no plugging
        // information.
        if event.is_benign_notice() {
            debug!("Power notice {:?}; ignoring", event);
            return;
        }

        let Some(device) = matchers::power_device(self.step) else {
            warn!("Power event {:?} while current step is {}", event, self.step);
            return;
        };

        let required = i64::from(self.settings.protocol.power_plug_repetitions) * 2;
        let step = self.step;
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        if robot.device(device).ok {
            return;
        }

        let source = if device == Device::PowerJack {
            "Adapter"
        } else {
            "Docking base"
        };
        if matchers::power_matches(event, step, robot.device(device).value) {
            let action = if event == PowerEvent::Unplugged {
                "unplugged"
            } else {
                "plugged"
            };
            info!("{source} {action}, as expected");
            if robot.bump_value(device) >= required {
                info!("{source} plugging evaluation completed");
                robot.pass(device);
                self.advance();
            }
        } else {
            warn!("Unexpected power event: {:?}", event);
        }
    }

    fn on_digital_input(&mut self, frame: DigitalInputFrame) {
        if !self.session.active() {
            return;
        }
        if self.step != EvalStep::TestDigitalIo {
            debug!("Digital input frame outside its stage; ignoring");
            return;
        }

        let mask = {
            let Some(robot) = self.session.robot_mut() else {
                return;
            };
            if robot.device(Device::DigitalInput).ok {
                return;
            }
            if let Some(channel) = frame.first_asserted() {
                // Echo the asserted input on the matching output so the
                // operator sees the loop close.
                let mask = robot.device(Device::DigitalInput).value | (1 << channel);
                robot.set_value(Device::DigitalInput, mask);
                self.commands.set_output(channel, true);
                return;
            }
            robot.device(Device::DigitalInput).value
        };

        // All inputs released: outputs off, and once every channel has been
        // seen, hand the verdict to the operator.
        self.commands.all_outputs_off();
        if mask == 0b1111 && !self.answer_required {
            self.console.show_prompt(
                Severity::Info,
                "Digital I/O test",
                "Press the left function button if the output LEDs switched with the inputs or the right otherwise",
            );
            self.answer_required = true;
        }
    }

    fn on_diagnostics(&mut self, array: DiagnosticsArray) {
        if let Some(robot) = self.session.robot_mut() {
            robot.diagnostics = array.render();
        }
    }

    fn on_health(&mut self, level: HealthLevel) {
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        let before = robot.state();
        robot.degrade(level);
        if robot.state() > before {
            warn!(
                "Robot {} health degraded to {:?}",
                robot.serial_or_unknown(),
                robot.state()
            );
            if !robot.diagnostics.is_empty() {
                warn!("Full diagnostics:\n{}", robot.diagnostics);
            }
        } else {
            debug!(
                "Robot {} health report: {:?}",
                robot.serial_or_unknown(),
                level
            );
        }
    }

    // =========================================================================
    // Per-tick stage actions
    // =========================================================================

    async fn tick_actions(&mut self) {
        if !self.session.active() {
            return;
        }

        // A timed maneuver finishing is what moves the robot off the wall
        // and the sequence past the released stages.
        if self.motion.poll_deadline() {
            self.advance();
        }
        if self.motion.in_flight() {
            return;
        }

        let step_changed = self.step != self.previous_step;
        self.previous_step = self.step;

        match self.step {
            EvalStep::Initialization => self.advance(),
            EvalStep::AcquireSerial => {
                let acquired = self
                    .session
                    .robot()
                    .map(|robot| robot.device(Device::VersionInfo).ok)
                    .unwrap_or(false);
                if acquired {
                    self.advance();
                } else if self.ticks % u64::from(self.settings.protocol.ticks_for(Duration::from_secs(2))) == 0 {
                    debug!("Waiting for serial number...");
                }
            }
            EvalStep::TestDcAdapter => {
                if step_changed {
                    let reps = self.settings.protocol.power_plug_repetitions;
                    self.console.show_prompt(
                        Severity::Info,
                        "DC adapter plug test",
                        &format!("Plug and unplug the adapter to the robot {reps} time(s)"),
                    );
                }
            }
            EvalStep::TestDockingBase => {
                if step_changed {
                    let reps = self.settings.protocol.power_plug_repetitions;
                    self.console.show_prompt(
                        Severity::Info,
                        "Docking base plug test",
                        &format!("Plug and unplug the robot to its base {reps} time(s)"),
                    );
                }
            }
            EvalStep::Button0Pressed => {
                if step_changed {
                    self.console.show_prompt(
                        Severity::Info,
                        "Function buttons test",
                        "Press the three function buttons sequentially from left to right",
                    );
                }
            }
            EvalStep::Button0Released
            | EvalStep::Button1Pressed
            | EvalStep::Button1Released
            | EvalStep::Button2Pressed
            | EvalStep::Button2Released => {
                // Purely event-driven stages
            }
            EvalStep::TestLeds => self.test_leds(step_changed).await,
            EvalStep::TestSounds => self.test_sounds(step_changed).await,
            EvalStep::TestCliffSensors => {
                if step_changed {
                    let reps = self.settings.protocol.cliff_repetitions;
                    self.console.show_prompt(
                        Severity::Info,
                        "Cliff sensors test",
                        &format!("Raise and lower the robot {reps} time(s) to test the cliff sensors"),
                    );
                }
            }
            EvalStep::TestWheelDropSensors => {
                if step_changed {
                    let reps = self.settings.protocol.wheel_drop_repetitions;
                    self.console.show_prompt(
                        Severity::Info,
                        "Wheel drop sensors test",
                        &format!(
                            "Raise and lower the robot {reps} time(s) to test the wheel drop sensors"
                        ),
                    );
                }
            }
            EvalStep::CenterBumperPressed => {
                if step_changed {
                    self.console.show_prompt(
                        Severity::Info,
                        "Bumper sensors test",
                        "Place the robot facing a wall; after a moment it will drive forward",
                    );
                    self.settle(BUMPER_LAUNCH_DELAY).await;
                    if !self.stage_lost(EvalStep::CenterBumperPressed) {
                        self.motion.drive(BUMPER_LIN_SPEED, 0.0);
                    }
                }
            }
            EvalStep::CenterBumperReleased
            | EvalStep::RightBumperReleased
            | EvalStep::LeftBumperReleased => {
                // Waiting on the retreat maneuver and the release event
            }
            EvalStep::PointRightBumper => {
                self.motion
                    .drive_for(0.0, BUMPER_ANG_SPEED, turn_time(FRAC_PI_4, BUMPER_ANG_SPEED));
            }
            EvalStep::RightBumperPressed => self.motion.drive(BUMPER_LIN_SPEED, 0.0),
            EvalStep::PointLeftBumper => {
                self.motion
                    .drive_for(0.0, -BUMPER_ANG_SPEED, turn_time(FRAC_PI_2, BUMPER_ANG_SPEED));
            }
            EvalStep::LeftBumperPressed => self.motion.drive(BUMPER_LIN_SPEED, 0.0),
            EvalStep::PrepareMotorsTest => {
                if step_changed {
                    self.console.show_prompt(
                        Severity::Info,
                        "Motor current test",
                        "The robot will now drive forward...",
                    );
                }
                // Back parallel to the wall before the straight runs
                self.motion
                    .drive_for(0.0, -BUMPER_ANG_SPEED, turn_time(FRAC_PI_4, BUMPER_ANG_SPEED));
            }
            EvalStep::TestMotorsForward => {
                self.motion.drive_for(
                    MOTORS_LIN_SPEED,
                    0.0,
                    Duration::from_secs_f64(MOTORS_DISTANCE / MOTORS_LIN_SPEED),
                );
            }
            EvalStep::TestMotorsBackward => {
                self.motion.drive_for(
                    -MOTORS_LIN_SPEED,
                    0.0,
                    Duration::from_secs_f64(MOTORS_DISTANCE / MOTORS_LIN_SPEED),
                );
                self.console.show_prompt(
                    Severity::Info,
                    "Motor current test",
                    "The robot will now drive backward...",
                );
            }
            EvalStep::TestMotorsClockwise => {
                self.motion
                    .drive_for(0.0, -MOTORS_ANG_SPEED, turn_time(MOTORS_TURN, MOTORS_ANG_SPEED));
                self.console.show_prompt(
                    Severity::Info,
                    "Motor current test",
                    "...and spin to evaluate the motors",
                );
            }
            EvalStep::TestMotorsCounterCw => {
                self.motion
                    .drive_for(0.0, MOTORS_ANG_SPEED, turn_time(MOTORS_TURN, MOTORS_ANG_SPEED));
            }
            EvalStep::EvalMotorsCurrent => {
                self.console.hide_prompt();
                self.eval_motors_current();
                self.advance();
            }
            EvalStep::MeasureGyroError => {
                self.test_gyroscope().await;
                self.advance();
            }
            EvalStep::MeasureCharging => {
                self.measure_charge().await;
                // Advance before the next sensor frame overwrites the
                // measured delta with a raw voltage.
                self.advance();
            }
            EvalStep::TestDigitalIo => {
                if step_changed {
                    self.console.show_prompt(
                        Severity::Info,
                        "Digital I/O test",
                        "Press the four digital input buttons sequentially, from DI-1 to DI-4\nThe matching output LED should switch on and off as the result",
                    );
                    if let Some(robot) = self.session.robot_mut() {
                        robot.set_value(Device::DigitalInput, 0);
                    }
                    self.commands.all_outputs_off();
                }
            }
            EvalStep::TestAnalogInput => self.test_analog_input(step_changed),
            EvalStep::EvaluationCompleted => {
                let all_ok = self
                    .session
                    .robot()
                    .map(|robot| robot.all_ok())
                    .unwrap_or(false);
                self.console.show_prompt(
                    Severity::Info,
                    "Evaluation result",
                    &format!(
                        "Evaluation completed. Overall result: {}",
                        if all_ok { "PASS" } else { "FAILED" }
                    ),
                );
                self.session.finish_current();
                self.step = EvalStep::Initialization;
                self.previous_step = EvalStep::Initialization;
            }
        }
    }

    // =========================================================================
    // Synchronous sub-tests
    // =========================================================================

    async fn test_leds(&mut self, first_call: bool) {
        // The operator may answer only after seeing one full color cycle
        self.answer_required = !first_call;

        for color in [LedColor::Green, LedColor::Orange, LedColor::Red] {
            if self.stage_lost(EvalStep::TestLeds) {
                return;
            }
            let mut message = String::from(
                "You should see both LEDs blinking green, orange and red alternately\n",
            );
            if !first_call {
                message.push_str("Press the left function button if so or the right otherwise\n");
            }
            message.push_str(color.name());
            self.console
                .show_prompt(Severity::Info, "LEDs test", &message);

            self.commands.both_leds(color);
            self.settle(Duration::from_secs(1)).await;
            self.commands.both_leds(LedColor::Black);
            self.settle(Duration::from_millis(500)).await;
        }
    }

    async fn test_sounds(&mut self, first_call: bool) {
        self.answer_required = !first_call;

        for sound in Sound::ALL {
            if self.stage_lost(EvalStep::TestSounds) {
                return;
            }
            let mut message = String::from(
                "You should hear 'On', 'Off', 'Recharge', 'Button', 'Error', \
                 'Cleaning Start' and 'Cleaning End' continuously\n",
            );
            if !first_call {
                message.push_str("Press the left function button if so or the right otherwise\n");
            }
            message.push_str(sound.name());
            self.console
                .show_prompt(Severity::Info, "Sounds test", &message);

            self.commands.send(Command::Sound(sound));
            self.settle(Duration::from_millis(1200)).await;
        }
    }

    async fn test_gyroscope(&mut self) {
        self.console.show_prompt(
            Severity::Info,
            "Gyroscope test",
            "Place the robot with the check board right below the camera",
        );

        let calibration = self.settings.camera.calibration_file.clone();
        let device_index = self.settings.camera.device_index;
        if let Err(e) = self.estimator.init(&calibration, device_index) {
            error!("Gyroscope test initialization failed; aborting test: {e}");
            self.console.hide_prompt();
            return;
        }

        let attempts = self.settings.protocol.vision_poll_attempts;
        let poll = self.settings.protocol.vision_poll_interval;
        let mut diffs = [0.0_f64; 2];

        for sample in 0..2 {
            let mut vision_yaw = None;
            for _ in 0..attempts {
                self.settle(poll).await;
                if self.stage_lost(EvalStep::MeasureGyroError) {
                    self.console.hide_prompt();
                    return;
                }
                // The camera looks at the robot, so its yaw is inverted
                if let Some(yaw) = self.estimator.sample_yaw() {
                    vision_yaw = Some(-yaw);
                    self.console.hide_prompt();
                    break;
                }
                self.console.show_prompt(
                    Severity::Warn,
                    "Gyroscope test",
                    "Cannot recognize the check board; please place the robot right below the camera",
                );
            }

            let Some(vision_yaw) = vision_yaw else {
                error!(
                    "Cannot recognize the check board after {attempts} attempts; gyroscope test aborted"
                );
                self.console.hide_prompt();
                return;
            };

            let Some(robot) = self.session.robot_mut() else {
                return;
            };
            let gyro_yaw = robot.imu.latest_yaw;
            let diff = normalize_angle(gyro_yaw - vision_yaw);
            info!(
                "Gyroscope test {} result: imu yaw = {:.3} / vision yaw = {:.3} / diff = {:.3}",
                sample + 1,
                gyro_yaw,
                vision_yaw,
                diff
            );
            robot.imu.record(sample, gyro_yaw, diff);
            robot.bump_value(Device::Imu);
            diffs[sample] = diff;

            if sample == 0 {
                // A full turn each way, so drift or scale error surfaces as
                // disagreement between the two samples
                self.rotate_blocking(GYRO_ANG_SPEED).await;
                self.rotate_blocking(-GYRO_ANG_SPEED).await;
                if self.stage_lost(EvalStep::MeasureGyroError) {
                    self.console.hide_prompt();
                    return;
                }
            }
        }

        let tolerance = self.settings.protocol.gyro_camera_max_diff;
        if samples_agree(diffs[0], diffs[1], tolerance) {
            info!(
                "Gyroscope testing successful: diff 1 = {:.3} / diff 2 = {:.3}",
                diffs[0], diffs[1]
            );
            if let Some(robot) = self.session.robot_mut() {
                robot.pass(Device::Imu);
            }
        } else {
            warn!(
                "Gyroscope testing failed: diff 1 = {:.3} / diff 2 = {:.3}",
                diffs[0], diffs[1]
            );
        }
        self.console.hide_prompt();
    }

    async fn rotate_blocking(&mut self, angular: f64) {
        self.motion.drive(0.0, angular);
        self.settle(Duration::from_secs_f64(GYRO_TURN / angular.abs()))
            .await;
        self.motion.halt();
    }

    fn charge_sample(&self) -> i64 {
        self.session
            .robot()
            .map(|robot| robot.device(Device::Charging).value)
            .unwrap_or(0)
    }

    async fn measure_charge(&mut self) {
        let window = self.settings.protocol.charge_window;
        self.console.show_prompt(
            Severity::Info,
            "Charge measurement",
            &format!(
                "Plug the adapter to the robot and wait {} seconds",
                window.as_secs()
            ),
        );

        // Wait for charging to start before taking the first measure
        let timeout = self.settings.protocol.charge_plug_timeout;
        let deadline = Instant::now() + timeout;
        while self.charge_sample() == 0 {
            if Instant::now() >= deadline {
                self.console.hide_prompt();
                error!(
                    "Adapter not plugged after {} seconds; aborting charge measurement",
                    timeout.as_secs()
                );
                return;
            }
            self.settle(self.settings.protocol.tick_period()).await;
            if self.stage_lost(EvalStep::MeasureCharging) {
                self.console.hide_prompt();
                return;
            }
        }
        self.console.hide_prompt();

        self.settle(self.settings.protocol.charge_settle).await;
        let first = self.charge_sample();

        self.settle(window).await;
        if self.stage_lost(EvalStep::MeasureCharging) {
            return;
        }
        let second = self.charge_sample();

        let delta = second - first;
        let minimum = self.settings.protocol.min_charge_delta;
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        robot.set_value(Device::Charging, delta);
        if delta >= minimum {
            info!(
                "Charge measurement: {:.1} V in {} seconds",
                delta as f64 / 10.0,
                window.as_secs()
            );
            robot.pass(Device::Charging);
        } else {
            warn!(
                "Charge measurement: {:.1} V in {} seconds",
                delta as f64 / 10.0,
                window.as_secs()
            );
        }
    }

    fn test_analog_input(&mut self, first_call: bool) {
        if first_call {
            self.console.show_prompt(
                Severity::Info,
                "Analog input test",
                "Turn the analog input screws clockwise and counter-clockwise until reaching the limits\nThe feedback LEDs light while a limit registers",
            );
            self.commands.all_outputs_off();
            if let Some(robot) = self.session.robot_mut() {
                robot.set_value(Device::AnalogInput, 0);
                for channel in robot.analog.iter_mut() {
                    *channel = AnalogChannel::default();
                }
            }
        }

        let feedback_ticks = self
            .settings
            .protocol
            .ticks_for(self.settings.protocol.analog_feedback_time);
        let min_threshold = self.settings.protocol.analog_min_threshold;
        let max_threshold = self.settings.protocol.analog_max_threshold;

        let (min_crossed, max_crossed, feedback_expired, complete) = {
            let Some(robot) = self.session.robot_mut() else {
                return;
            };
            if robot.device(Device::AnalogInput).ok {
                return;
            }

            let was_lit = robot.analog.iter().any(|c| c.feedback_ticks > 0);
            for channel in robot.analog.iter_mut() {
                channel.feedback_ticks = channel.feedback_ticks.saturating_sub(1);
            }

            let mut min_crossed = false;
            let mut max_crossed = false;
            for channel in robot.analog.iter_mut() {
                if !channel.min_reached && channel.min <= min_threshold {
                    channel.min_reached = true;
                    channel.feedback_ticks = feedback_ticks;
                    min_crossed = true;
                }
                if !channel.max_reached && channel.max >= max_threshold {
                    channel.max_reached = true;
                    channel.feedback_ticks = feedback_ticks;
                    max_crossed = true;
                }
            }

            let lit = robot.analog.iter().any(|c| c.feedback_ticks > 0);
            let feedback_expired = was_lit && !lit && !min_crossed && !max_crossed;
            let complete = robot.analog.iter().all(|c| c.complete());
            (min_crossed, max_crossed, feedback_expired, complete)
        };

        // Feedback LEDs: output 0 answers minimum crossings, output 3 maximum
        if min_crossed {
            self.commands.set_output(0, true);
        }
        if max_crossed {
            self.commands.set_output(3, true);
        }
        if feedback_expired {
            self.commands.set_output(0, false);
            self.commands.set_output(3, false);
        }

        if complete {
            if let Some(robot) = self.session.robot_mut() {
                let mut mask = 0_i64;
                for (index, channel) in robot.analog.iter().enumerate() {
                    if channel.min_reached {
                        mask |= 1 << index;
                    }
                    if channel.max_reached {
                        mask |= 1 << (index + 4);
                    }
                }
                robot.set_value(Device::AnalogInput, mask);
                robot.pass(Device::AnalogInput);
            }
            info!("Analog input evaluation completed");
            self.console.hide_prompt();
            self.advance();
        }
    }

    fn eval_motors_current(&mut self) {
        let limit = self.settings.protocol.motor_max_current;
        let Some(robot) = self.session.robot_mut() else {
            return;
        };
        let left = robot.device(Device::MotorLeft).value;
        let right = robot.device(Device::MotorRight).value;
        robot.set_ok(Device::MotorLeft, left <= limit);
        robot.set_ok(Device::MotorRight, right <= limit);
        if robot.motors_ok() {
            info!("Motor current evaluation completed ({left}, {right})");
        } else {
            warn!("Motor current too high! ({left}, {right})");
        }
    }
}

fn turn_time(angle: f64, angular_speed: f64) -> Duration {
    Duration::from_secs_f64(angle / angular_speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Bumper, CliffSensor, Wheel};
    use crate::sim::{PromptLog, RecordingConsole, ScriptedEstimator};
    use tempfile::TempDir;

    struct Harness {
        seq: Sequencer,
        link: TransportLink,
        prompts: PromptLog,
        _dir: TempDir,
    }

    fn harness_with(estimator: ScriptedEstimator) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.output.results_file = dir.path().join("results.csv");
        let (console, prompts) = RecordingConsole::new();
        let (seq, link) = Sequencer::new(settings, Box::new(console), Box::new(estimator));
        Harness {
            seq,
            link,
            prompts,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedEstimator::unavailable())
    }

    fn version_info(word: u32) -> VersionInfo {
        VersionInfo {
            udid: [word, 0xbeef, 0x2a],
            hardware: 0x0001_0000,
            firmware: 0x0001_0103,
            software: 0x0002_0000,
        }
    }

    fn online(seq: &mut Sequencer, word: u32) {
        seq.handle_event(Event::Connection(ConnectionEvent::Online));
        seq.handle_event(Event::VersionInfo(version_info(word)));
    }

    fn force_step(seq: &mut Sequencer, step: EvalStep) {
        seq.step = step;
        seq.previous_step = step;
    }

    fn bumper(bumper: Bumper, state: PressState) -> Event {
        Event::Bumper(BumperEvent { bumper, state })
    }

    fn button(button: Button, state: PressState) -> Event {
        Event::Button(ButtonEvent { button, state })
    }

    fn cliff(sensor: CliffSensor, state: CliffState) -> Event {
        Event::Cliff(CliffEvent { sensor, state })
    }

    fn device_report(seq: &Sequencer, device: Device) -> crate::robot::DeviceReport {
        seq.session.robot().map(|r| r.device(device)).unwrap_or_default()
    }

    fn drain_commands(link: &mut TransportLink) -> Vec<Command> {
        std::iter::from_fn(|| link.commands.try_recv().ok()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_center_bumper_press_advances_and_duplicate_is_rejected() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::CenterBumperPressed);
        drain_commands(&mut h.link);

        h.seq.handle_event(bumper(Bumper::Center, PressState::Pressed));
        assert_eq!(device_report(&h.seq, Device::BumperCenter).value, 1);
        assert_eq!(h.seq.current_step(), EvalStep::CenterBumperReleased);
        assert!(h.seq.motion.in_flight());
        let sent = drain_commands(&mut h.link);
        assert!(sent.iter().any(|c| matches!(
            c,
            Command::Velocity { linear, .. } if *linear < 0.0
        )));

        // A second press instead of the expected release is noise
        h.seq.handle_event(bumper(Bumper::Center, PressState::Pressed));
        assert_eq!(device_report(&h.seq, Device::BumperCenter).value, 1);
        assert_eq!(h.seq.current_step(), EvalStep::CenterBumperReleased);

        // Wrong channel is noise too
        h.seq.handle_event(bumper(Bumper::Left, PressState::Released));
        assert_eq!(device_report(&h.seq, Device::BumperLeft).value, 0);

        h.seq.handle_event(bumper(Bumper::Center, PressState::Released));
        let report = device_report(&h.seq, Device::BumperCenter);
        assert_eq!(report.value, 2);
        assert!(report.ok);
        // The release does not advance; the retreat deadline does
        assert_eq!(h.seq.current_step(), EvalStep::CenterBumperReleased);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_evaluated_serial_is_rejected() {
        let mut h = harness();
        online(&mut h.seq, 7);
        assert!(h.seq.session().active());
        h.seq.handle_event(Event::Connection(ConnectionEvent::Offline));
        assert_eq!(h.seq.session().evaluated().len(), 1);

        // Same unit shows up again
        online(&mut h.seq, 7);
        assert!(!h.seq.session().active());
        assert_eq!(h.seq.session().evaluated().len(), 1);
        assert_eq!(h.prompts.count_titled("Known robot"), 1);

        // A different unit is accepted
        online(&mut h.seq, 8);
        assert!(h.seq.session().active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_reannounce_same_serial_is_ignored() {
        let mut h = harness();
        online(&mut h.seq, 7);
        let serial = h.seq.session().robot().unwrap().serial.clone();
        h.seq.handle_event(Event::VersionInfo(version_info(7)));
        assert_eq!(h.seq.session().robot().unwrap().serial, serial);
        assert!(h.seq.session().active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_positional_sequence() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::Button0Pressed);

        // Out-of-order press is rejected
        h.seq.handle_event(button(Button::B1, PressState::Pressed));
        assert_eq!(h.seq.current_step(), EvalStep::Button0Pressed);

        for (btn, dev) in [
            (Button::B0, Device::Button0),
            (Button::B1, Device::Button1),
            (Button::B2, Device::Button2),
        ] {
            h.seq.handle_event(button(btn, PressState::Pressed));
            assert!(!device_report(&h.seq, dev).ok);
            h.seq.handle_event(button(btn, PressState::Released));
            assert!(device_report(&h.seq, dev).ok);
        }
        assert_eq!(h.seq.current_step(), EvalStep::TestLeds);
        assert!(h.seq.session().robot().unwrap().buttons_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cliff_sensors_need_two_cycles_each() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::TestCliffSensors);

        // Floor before cliff violates the parity rule
        h.seq.handle_event(cliff(CliffSensor::Left, CliffState::Floor));
        assert_eq!(device_report(&h.seq, Device::CliffLeft).value, 0);

        for _ in 0..2 {
            for sensor in [CliffSensor::Left, CliffSensor::Center, CliffSensor::Right] {
                h.seq.handle_event(cliff(sensor, CliffState::Cliff));
                h.seq.handle_event(cliff(sensor, CliffState::Floor));
            }
        }
        assert!(h.seq.session().robot().unwrap().cliffs_ok());
        assert_eq!(h.seq.current_step(), EvalStep::TestWheelDropSensors);

        // Further cliff traffic after completion is discarded
        h.seq.handle_event(cliff(CliffSensor::Left, CliffState::Cliff));
        assert_eq!(device_report(&h.seq, Device::CliffLeft).value, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wheel_drop_cycles() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::TestWheelDropSensors);

        for _ in 0..2 {
            for wheel in [Wheel::Left, Wheel::Right] {
                h.seq.handle_event(Event::WheelDrop(WheelDropEvent {
                    wheel,
                    state: WheelState::Dropped,
                }));
                h.seq.handle_event(Event::WheelDrop(WheelDropEvent {
                    wheel,
                    state: WheelState::Raised,
                }));
            }
        }
        assert!(h.seq.session().robot().unwrap().wheel_drops_ok());
        assert_eq!(h.seq.current_step(), EvalStep::CenterBumperPressed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_plug_sources_in_turn() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::TestDcAdapter);

        // Wrong source plugged
        h.seq.handle_event(Event::Power(PowerEvent::PluggedToDock));
        assert_eq!(device_report(&h.seq, Device::PowerJack).value, 0);

        // Battery notices are not protocol traffic
        h.seq.handle_event(Event::Power(PowerEvent::BatteryLow));
        assert_eq!(device_report(&h.seq, Device::PowerJack).value, 0);

        h.seq.handle_event(Event::Power(PowerEvent::PluggedToAdapter));
        assert_eq!(device_report(&h.seq, Device::PowerJack).value, 1);
        // Double plug violates parity
        h.seq.handle_event(Event::Power(PowerEvent::PluggedToAdapter));
        assert_eq!(device_report(&h.seq, Device::PowerJack).value, 1);

        h.seq.handle_event(Event::Power(PowerEvent::Unplugged));
        assert!(device_report(&h.seq, Device::PowerJack).ok);
        assert_eq!(h.seq.current_step(), EvalStep::TestDockingBase);

        h.seq.handle_event(Event::Power(PowerEvent::PluggedToDock));
        h.seq.handle_event(Event::Power(PowerEvent::Unplugged));
        assert!(device_report(&h.seq, Device::PowerDock).ok);
        assert_eq!(h.seq.current_step(), EvalStep::Button0Pressed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digital_io_prompts_exactly_once_then_confirms() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::TestDigitalIo);

        for channel in 0..4 {
            let mut levels = [true; 4];
            levels[channel] = false;
            h.seq
                .handle_event(Event::DigitalInput(DigitalInputFrame { levels }));
            h.seq
                .handle_event(Event::DigitalInput(DigitalInputFrame { levels: [true; 4] }));
            if channel < 3 {
                assert!(!h.seq.answer_required(), "prompt fired after channel {channel}");
            }
        }
        assert!(h.seq.answer_required());
        assert_eq!(h.seq.current_step(), EvalStep::TestDigitalIo);
        assert_eq!(h.prompts.count_titled("Digital I/O test"), 1);

        // Another idle frame must not re-prompt
        h.seq
            .handle_event(Event::DigitalInput(DigitalInputFrame { levels: [true; 4] }));
        assert_eq!(h.prompts.count_titled("Digital I/O test"), 1);

        // Left button release confirms both halves of the loop
        h.seq.handle_event(button(Button::B0, PressState::Released));
        assert!(device_report(&h.seq, Device::DigitalInput).ok);
        assert!(device_report(&h.seq, Device::DigitalOutput).ok);
        assert!(!h.seq.answer_required());
        assert_eq!(h.seq.current_step(), EvalStep::TestAnalogInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gyroscope_estimator_unavailable_aborts_but_advances() {
        let mut h = harness_with(ScriptedEstimator::unavailable());
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::MeasureGyroError);

        h.seq.step_once().await;

        assert!(!device_report(&h.seq, Device::Imu).ok);
        assert_eq!(h.seq.current_step(), EvalStep::MeasureCharging);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gyroscope_init_failure_aborts_but_advances() {
        let mut h = harness_with(ScriptedEstimator::failing_init());
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::MeasureGyroError);

        h.seq.step_once().await;

        assert!(!device_report(&h.seq, Device::Imu).ok);
        assert_eq!(device_report(&h.seq, Device::Imu).value, 0);
        assert_eq!(h.seq.current_step(), EvalStep::MeasureCharging);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gyroscope_consistent_samples_pass() {
        let mut h = harness_with(ScriptedEstimator::fixed(-0.42));
        online(&mut h.seq, 1);
        h.seq.handle_event(Event::Gyro(GyroSample { yaw: 0.42 }));
        force_step(&mut h.seq, EvalStep::MeasureGyroError);

        h.seq.step_once().await;

        let report = device_report(&h.seq, Device::Imu);
        assert!(report.ok);
        assert_eq!(report.value, 2);
        assert_eq!(h.seq.current_step(), EvalStep::MeasureCharging);
        let imu = h.seq.session().robot().unwrap().imu;
        assert!(imu.diff[0].abs() < 1e-9);
        assert!(imu.diff[1].abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_charge_timeout_fails_device_but_advances() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::MeasureCharging);

        h.seq.step_once().await;

        let report = device_report(&h.seq, Device::Charging);
        assert!(!report.ok);
        assert_eq!(report.value, 0);
        assert_eq!(h.seq.current_step(), EvalStep::TestDigitalIo);
    }

    #[tokio::test(start_paused = true)]
    async fn test_charge_delta_is_second_minus_first_sample() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::MeasureCharging);

        let events = h.link.events.clone();
        tokio::spawn(async move {
            // One tenth of a volt per second while plugged
            for i in 0..1200_u32 {
                let _ = events.send(Event::SensorCore(SensorCoreFrame {
                    motor_currents: [0, 0],
                    charging: true,
                    battery: (150 + i / 20).min(255) as u8,
                    analog_inputs: [2000; 4],
                }));
                sleep(Duration::from_millis(50)).await;
            }
        });

        h.seq.step_once().await;

        let report = device_report(&h.seq, Device::Charging);
        assert!(report.ok, "delta {} below threshold", report.value);
        assert!(report.value >= 2);
        assert_eq!(h.seq.current_step(), EvalStep::TestDigitalIo);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_current_over_limit_fails_that_motor_only() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::TestMotorsForward);
        h.seq.handle_event(Event::SensorCore(SensorCoreFrame {
            motor_currents: [30, 5],
            charging: false,
            battery: 160,
            analog_inputs: [2000; 4],
        }));
        assert_eq!(device_report(&h.seq, Device::MotorLeft).value, 30);

        force_step(&mut h.seq, EvalStep::EvalMotorsCurrent);
        h.seq.step_once().await;

        assert!(!device_report(&h.seq, Device::MotorLeft).ok);
        assert!(device_report(&h.seq, Device::MotorRight).ok);
        assert_eq!(h.seq.current_step(), EvalStep::MeasureGyroError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_led_rejection_leaves_leds_failed_and_moves_on() {
        let mut h = harness();
        online(&mut h.seq, 1);
        h.seq.step = EvalStep::TestLeds;
        h.seq.previous_step = EvalStep::Button2Released;

        // First pass announces without arming the answer
        h.seq.step_once().await;
        assert!(!h.seq.answer_required());

        // Second pass arms it
        h.seq.step_once().await;
        assert!(h.seq.answer_required());

        h.seq.handle_event(button(Button::B2, PressState::Released));
        assert!(!device_report(&h.seq, Device::Led1).ok);
        assert!(!device_report(&h.seq, Device::Led2).ok);
        assert!(!h.seq.answer_required());
        assert_eq!(h.seq.current_step(), EvalStep::TestSounds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analog_input_completion() {
        let mut h = harness();
        online(&mut h.seq, 1);
        h.seq.step = EvalStep::TestAnalogInput;
        h.seq.previous_step = EvalStep::TestDigitalIo;

        // Entry tick resets channel state
        h.seq.step_once().await;

        h.seq.handle_event(Event::SensorCore(SensorCoreFrame {
            motor_currents: [0, 0],
            charging: false,
            battery: 160,
            analog_inputs: [1; 4],
        }));
        h.seq.step_once().await;
        assert!(!device_report(&h.seq, Device::AnalogInput).ok);

        h.seq.handle_event(Event::SensorCore(SensorCoreFrame {
            motor_currents: [0, 0],
            charging: false,
            battery: 160,
            analog_inputs: [4095; 4],
        }));

        // Both thresholds crossed; completion still waits out the feedback
        for _ in 0..30 {
            if device_report(&h.seq, Device::AnalogInput).ok {
                break;
            }
            h.seq.step_once().await;
        }
        let report = device_report(&h.seq, Device::AnalogInput);
        assert!(report.ok);
        assert_eq!(report.value, 0xff);
        assert_eq!(h.seq.current_step(), EvalStep::EvaluationCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_mid_subtest_aborts_cleanly() {
        let mut h = harness();
        online(&mut h.seq, 1);
        force_step(&mut h.seq, EvalStep::MeasureCharging);

        let events = h.link.events.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            let _ = events.send(Event::Connection(ConnectionEvent::Offline));
        });

        h.seq.step_once().await;

        assert!(!h.seq.session().active());
        assert_eq!(h.seq.session().evaluated().len(), 1);
    }
}
