//! Motion controller.
//!
//! Publishes velocity commands and owns the one-shot stop deadline for
//! timed maneuvers. The non-blocking form arms a deadline; the tick loop
//! polls it, and on expiry the controller publishes zero velocity and
//! reports the expiry so the sequencer can advance. Re-arming replaces any
//! deadline already in flight. A zero duration publishes the velocity once
//! and arms nothing.
//!
//! Blocking maneuvers are composed by the sequencer: publish, cooperative
//! wait, stop.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::commands::{Command, CommandBus};

/// Velocity publisher with a single armed stop deadline.
#[derive(Debug)]
pub struct MotionController {
    commands: CommandBus,
    deadline: Option<Instant>,
}

impl MotionController {
    /// Create a controller publishing on the given bus.
    pub fn new(commands: CommandBus) -> Self {
        Self {
            commands,
            deadline: None,
        }
    }

    /// Publish a velocity with no timed stop.
    pub fn drive(&self, linear: f64, angular: f64) {
        self.commands.send(Command::Velocity { linear, angular });
    }

    /// Publish a velocity and arm the stop deadline, replacing any armed
    /// deadline.
    pub fn drive_for(&mut self, linear: f64, angular: f64, duration: Duration) {
        self.drive(linear, angular);
        if duration > Duration::ZERO {
            self.deadline = Some(Instant::now() + duration);
        }
    }

    /// A timed maneuver is still in flight.
    pub fn in_flight(&self) -> bool {
        self.deadline.is_some()
    }

    /// Publish zero velocity and disarm any deadline.
    pub fn halt(&mut self) {
        self.deadline = None;
        self.drive(0.0, 0.0);
    }

    /// Check the armed deadline; on expiry stop the robot, disarm, and
    /// return true exactly once.
    pub fn poll_deadline(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                debug!("Timed maneuver finished, stopping");
                self.deadline = None;
                self.drive(0.0, 0.0);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (MotionController, tokio::sync::mpsc::UnboundedReceiver<Command>) {
        let (bus, rx) = CommandBus::new();
        (MotionController::new(bus), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_never_arms() {
        let (mut motion, mut rx) = controller();
        motion.drive_for(0.2, 0.0, Duration::ZERO);
        assert!(!motion.in_flight());
        assert_eq!(
            rx.try_recv().ok(),
            Some(Command::Velocity {
                linear: 0.2,
                angular: 0.0
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_once_and_stops() {
        let (mut motion, mut rx) = controller();
        motion.drive_for(0.1, 0.0, Duration::from_secs(1));
        assert!(motion.in_flight());
        assert!(!motion.poll_deadline());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(motion.poll_deadline());
        assert!(!motion.in_flight());
        assert!(!motion.poll_deadline());

        // Velocity publish, then the zero publish from the expiry
        assert_eq!(
            rx.try_recv().ok(),
            Some(Command::Velocity {
                linear: 0.1,
                angular: 0.0
            })
        );
        assert_eq!(
            rx.try_recv().ok(),
            Some(Command::Velocity {
                linear: 0.0,
                angular: 0.0
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_replaces_the_deadline() {
        let (mut motion, mut rx) = controller();
        motion.drive_for(0.1, 0.0, Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(500)).await;
        motion.drive_for(0.0, 0.5, Duration::from_secs(2));

        // The first deadline would have fired here; the re-arm replaced it.
        tokio::time::advance(Duration::from_millis(700)).await;
        assert!(!motion.poll_deadline());

        tokio::time::advance(Duration::from_millis(1400)).await;
        assert!(motion.poll_deadline());

        let sent: Vec<Command> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(sent.len(), 3);
    }
}
