//! The ordered list of qualification stages.
//!
//! `EvalStep` is a total order: the sequencer only ever moves forward
//! through `ORDER`, one stage at a time, except for the explicit wrap back
//! to `Initialization` once a full evaluation cycle completes. The
//! successor is a pure function over the list; no enumerator arithmetic.

use crate::events::Button;

/// One stage of the qualification sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalStep {
    /// Entry stage; advances immediately once a robot is under test.
    Initialization,
    /// Wait for the version-info event that carries the serial number.
    AcquireSerial,
    /// Plug/unplug the DC adapter.
    TestDcAdapter,
    /// Seat/unseat the robot on its docking base.
    TestDockingBase,
    /// Expect the left function button pressed.
    Button0Pressed,
    /// Expect the left function button released.
    Button0Released,
    /// Expect the middle function button pressed.
    Button1Pressed,
    /// Expect the middle function button released.
    Button1Released,
    /// Expect the right function button pressed.
    Button2Pressed,
    /// Expect the right function button released.
    Button2Released,
    /// Cycle LED colors until the operator answers.
    TestLeds,
    /// Cycle sounds until the operator answers.
    TestSounds,
    /// Raise/lower the robot to exercise the cliff sensors.
    TestCliffSensors,
    /// Raise/lower the robot to exercise the wheel-drop sensors.
    TestWheelDropSensors,
    /// Drive forward into the wall; expect the center bumper pressed.
    CenterBumperPressed,
    /// Retreat; expect the center bumper released.
    CenterBumperReleased,
    /// Turn so the right bumper faces the wall.
    PointRightBumper,
    /// Drive forward; expect the right bumper pressed.
    RightBumperPressed,
    /// Retreat; expect the right bumper released.
    RightBumperReleased,
    /// Turn so the left bumper faces the wall.
    PointLeftBumper,
    /// Drive forward; expect the left bumper pressed.
    LeftBumperPressed,
    /// Retreat; expect the left bumper released.
    LeftBumperReleased,
    /// Turn parallel to the wall before the motor run.
    PrepareMotorsTest,
    /// Timed forward translation while current accumulates.
    TestMotorsForward,
    /// Timed backward translation.
    TestMotorsBackward,
    /// Full clockwise turn.
    TestMotorsClockwise,
    /// Full counter-clockwise turn.
    TestMotorsCounterCw,
    /// Compare accumulated motor currents against the limit.
    EvalMotorsCurrent,
    /// Gyroscope vs. vision cross-check.
    MeasureGyroError,
    /// Battery charge measurement.
    MeasureCharging,
    /// Digital input/output loop test.
    TestDigitalIo,
    /// Analog input sweep test.
    TestAnalogInput,
    /// Terminal stage: report, persist, wrap.
    EvaluationCompleted,
}

/// Every stage, in evaluation order.
pub const ORDER: [EvalStep; 33] = [
    EvalStep::Initialization,
    EvalStep::AcquireSerial,
    EvalStep::TestDcAdapter,
    EvalStep::TestDockingBase,
    EvalStep::Button0Pressed,
    EvalStep::Button0Released,
    EvalStep::Button1Pressed,
    EvalStep::Button1Released,
    EvalStep::Button2Pressed,
    EvalStep::Button2Released,
    EvalStep::TestLeds,
    EvalStep::TestSounds,
    EvalStep::TestCliffSensors,
    EvalStep::TestWheelDropSensors,
    EvalStep::CenterBumperPressed,
    EvalStep::CenterBumperReleased,
    EvalStep::PointRightBumper,
    EvalStep::RightBumperPressed,
    EvalStep::RightBumperReleased,
    EvalStep::PointLeftBumper,
    EvalStep::LeftBumperPressed,
    EvalStep::LeftBumperReleased,
    EvalStep::PrepareMotorsTest,
    EvalStep::TestMotorsForward,
    EvalStep::TestMotorsBackward,
    EvalStep::TestMotorsClockwise,
    EvalStep::TestMotorsCounterCw,
    EvalStep::EvalMotorsCurrent,
    EvalStep::MeasureGyroError,
    EvalStep::MeasureCharging,
    EvalStep::TestDigitalIo,
    EvalStep::TestAnalogInput,
    EvalStep::EvaluationCompleted,
];

impl EvalStep {
    /// Position of this stage in the evaluation order.
    pub fn index(self) -> usize {
        // ORDER is exhaustive, so the lookup always succeeds.
        ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }

    /// The next stage; saturates at the terminal stage. The wrap back to
    /// `Initialization` happens explicitly in the completion action.
    pub fn next(self) -> EvalStep {
        let idx = self.index();
        if idx + 1 < ORDER.len() {
            ORDER[idx + 1]
        } else {
            self
        }
    }

    /// Stage offset relative to `base`, when at or past it.
    pub fn offset_from(self, base: EvalStep) -> Option<usize> {
        self.index().checked_sub(base.index())
    }

    /// Stages during which function buttons are under positional test.
    pub fn in_button_range(self) -> bool {
        (EvalStep::Button0Pressed.index()..=EvalStep::Button2Released.index())
            .contains(&self.index())
    }

    /// Stages during which bumpers are under test.
    pub fn in_bumper_range(self) -> bool {
        (EvalStep::CenterBumperPressed.index()..=EvalStep::LeftBumperReleased.index())
            .contains(&self.index())
    }

    /// Stages during which motor current accumulates.
    pub fn in_motor_range(self) -> bool {
        (EvalStep::TestMotorsForward.index()..=EvalStep::TestMotorsCounterCw.index())
            .contains(&self.index())
    }

    /// Stages whose operator prompts are answered with the function buttons.
    pub fn awaits_operator_answer(self) -> bool {
        matches!(
            self,
            EvalStep::TestLeds | EvalStep::TestSounds | EvalStep::TestDigitalIo
        )
    }

    /// Human-readable label for the operator-judged stages.
    pub fn judged_label(self) -> &'static str {
        match self {
            EvalStep::TestLeds => "LEDs",
            EvalStep::TestSounds => "Sounds",
            EvalStep::TestDigitalIo => "Digital I/O",
            _ => "?",
        }
    }
}

impl std::fmt::Display for EvalStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Button stage offsets map pairwise onto buttons: offset/2 selects the
/// button, even offsets expect a press.
pub fn button_for_offset(offset: usize) -> Option<Button> {
    match offset / 2 {
        0 => Some(Button::B0),
        1 => Some(Button::B1),
        2 => Some(Button::B2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_total_and_strictly_increasing() {
        for window in ORDER.windows(2) {
            assert!(window[0].index() < window[1].index());
            assert_eq!(window[0].next(), window[1]);
        }
    }

    #[test]
    fn test_next_saturates_at_terminal_stage() {
        assert_eq!(
            EvalStep::EvaluationCompleted.next(),
            EvalStep::EvaluationCompleted
        );
    }

    #[test]
    fn test_offsets() {
        assert_eq!(
            EvalStep::Button2Released.offset_from(EvalStep::Button0Pressed),
            Some(5)
        );
        assert_eq!(
            EvalStep::Button0Pressed.offset_from(EvalStep::Button2Released),
            None
        );
    }

    #[test]
    fn test_ranges() {
        assert!(EvalStep::Button1Released.in_button_range());
        assert!(!EvalStep::TestLeds.in_button_range());
        assert!(EvalStep::PointLeftBumper.in_bumper_range());
        assert!(!EvalStep::PrepareMotorsTest.in_bumper_range());
        assert!(EvalStep::TestMotorsClockwise.in_motor_range());
        assert!(!EvalStep::EvalMotorsCurrent.in_motor_range());
    }
}
