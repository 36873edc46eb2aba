//! Outgoing actuation commands.
//!
//! Commands are fire-and-forget: the sequencer pushes them onto an
//! unbounded channel and the transport forwards them to the robot. A
//! dropped receiver is logged once per send and otherwise ignored, so a
//! transport restart never takes the sequencer down.

use tokio::sync::mpsc;
use tracing::warn;

/// LED selector on the robot's top panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    /// First programmable LED.
    Led1,
    /// Second programmable LED.
    Led2,
}

/// Colors the panel LEDs can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    /// LED off.
    Black,
    /// Green.
    Green,
    /// Orange.
    Orange,
    /// Red.
    Red,
}

impl LedColor {
    /// Display name used in operator prompts.
    pub fn name(self) -> &'static str {
        match self {
            LedColor::Black => "BLACK",
            LedColor::Green => "GREEN",
            LedColor::Orange => "ORANGE",
            LedColor::Red => "RED",
        }
    }
}

/// Preprogrammed sounds the robot can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    /// Power-on jingle.
    On,
    /// Power-off jingle.
    Off,
    /// Recharge notice.
    Recharge,
    /// Button feedback blip.
    Button,
    /// Error tone.
    Error,
    /// Task start.
    CleaningStart,
    /// Task end.
    CleaningEnd,
}

impl Sound {
    /// All sounds, in playback order for the sound test.
    pub const ALL: [Sound; 7] = [
        Sound::On,
        Sound::Off,
        Sound::Recharge,
        Sound::Button,
        Sound::Error,
        Sound::CleaningStart,
        Sound::CleaningEnd,
    ];

    /// Display name used in operator prompts.
    pub fn name(self) -> &'static str {
        match self {
            Sound::On => "ON",
            Sound::Off => "OFF",
            Sound::Recharge => "RECHARGE",
            Sound::Button => "BUTTON",
            Sound::Error => "ERROR",
            Sound::CleaningStart => "CLEANING START",
            Sound::CleaningEnd => "CLEANING END",
        }
    }
}

/// One outgoing actuation command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Drive at the given linear (m/s) and angular (rad/s) velocity.
    Velocity {
        /// Linear velocity, m/s.
        linear: f64,
        /// Angular velocity, rad/s.
        angular: f64,
    },
    /// Set a panel LED color.
    Led {
        /// Target LED.
        led: Led,
        /// Color to show.
        color: LedColor,
    },
    /// Play a preprogrammed sound.
    Sound(Sound),
    /// Drive the digital output channels.
    DigitalOutput {
        /// Which channels to touch.
        mask: [bool; 4],
        /// Levels for the touched channels.
        values: [bool; 4],
    },
}

/// Fire-and-forget sender half of the command channel.
#[derive(Debug, Clone)]
pub struct CommandBus {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandBus {
    /// Create a command bus and the receiver the transport drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send one command; a closed transport is logged and swallowed.
    pub fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Command dropped: transport receiver is gone");
        }
    }

    /// Switch a single digital output channel.
    pub fn set_output(&self, channel: usize, on: bool) {
        let mut mask = [false; 4];
        let mut values = [false; 4];
        if let Some(flag) = mask.get_mut(channel) {
            *flag = true;
        }
        if let Some(value) = values.get_mut(channel) {
            *value = on;
        }
        self.send(Command::DigitalOutput { mask, values });
    }

    /// Switch every digital output channel off.
    pub fn all_outputs_off(&self) {
        self.send(Command::DigitalOutput {
            mask: [true; 4],
            values: [false; 4],
        });
    }

    /// Set both panel LEDs to the same color.
    pub fn both_leds(&self, color: LedColor) {
        self.send(Command::Led {
            led: Led::Led1,
            color,
        });
        self.send(Command::Led {
            led: Led::Led2,
            color,
        });
    }
}
