//! Factory acceptance-test sequencer for a mobile robot base.
//!
//! Drives a robot through an ordered battery of hardware checks (buttons,
//! bumpers, wheel-drop and cliff sensors, power-source plugging, digital
//! and analog I/O, motor current, a gyroscope-vs-vision cross-check and
//! battery charging) and produces a pass/fail verdict per device and per
//! unit, appended as one CSV row per robot.
//!
//! # Architecture
//!
//! The host process owns the transport (decoding robot traffic into typed
//! [`events::Event`]s and forwarding [`commands::Command`]s back), the
//! operator display behind [`prompt::OperatorConsole`], and the camera
//! estimator behind [`vision::YawEstimator`]. Everything else is the
//! [`sequencer::Sequencer`]: a single task that drains the event queue
//! between scheduler ticks, reconciles events against each device's
//! expected protocol, moves the robot to exercise the next device, and
//! retires at most one robot-under-test at a time into an append-only
//! evaluated registry.
//!
//! # Usage
//!
//! ```rust,ignore
//! let settings = Settings::load()?;
//! settings.validate()?;
//! let (mut sequencer, link) = Sequencer::new(
//!     settings,
//!     Box::new(MyGuiConsole::new()),
//!     Box::new(CheckBoardCamera::new()),
//! );
//! spawn_transport_glue(link);
//! sequencer.run().await?;
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod matchers;
pub mod motion;
pub mod prompt;
pub mod report;
pub mod robot;
pub mod sequencer;
pub mod session;
pub mod sim;
pub mod steps;
pub mod vision;

pub use config::Settings;
pub use error::{QcError, QcResult};
pub use sequencer::{Sequencer, TransportLink};
pub use steps::EvalStep;
