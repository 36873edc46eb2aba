//! Session management: the single robot under test and the evaluated
//! registry.
//!
//! At most one robot is under evaluation at any instant. Finished or
//! abandoned robots move into an append-only registry keyed by serial; a
//! serial already in the registry is never evaluated again in this
//! session. Persistence is triggered here, on every path that retires a
//! robot, so no verdict is ever silently lost.

use tracing::{error, info, warn};

use crate::report::ReportWriter;
use crate::robot::RobotRecord;

/// Owns the robot under test, the evaluated registry, and the result file.
#[derive(Debug)]
pub struct SessionManager {
    under_test: Option<RobotRecord>,
    evaluated: Vec<RobotRecord>,
    writer: ReportWriter,
}

impl SessionManager {
    /// Create a session persisting through `writer`.
    pub fn new(writer: ReportWriter) -> Self {
        Self {
            under_test: None,
            evaluated: Vec::new(),
            writer,
        }
    }

    /// A robot is currently under evaluation.
    pub fn active(&self) -> bool {
        self.under_test.is_some()
    }

    /// The robot under test.
    pub fn robot(&self) -> Option<&RobotRecord> {
        self.under_test.as_ref()
    }

    /// The robot under test, mutably.
    pub fn robot_mut(&mut self) -> Option<&mut RobotRecord> {
        self.under_test.as_mut()
    }

    /// Every robot retired so far, in retirement order.
    pub fn evaluated(&self) -> &[RobotRecord] {
        &self.evaluated
    }

    /// Whether a serial has already been evaluated this session.
    pub fn already_evaluated(&self, serial: &str) -> bool {
        self.evaluated
            .iter()
            .any(|robot| robot.serial.as_deref() == Some(serial))
    }

    /// Start evaluating a fresh robot.
    ///
    /// A robot still under test is an interruption: its partial results are
    /// persisted before the replacement is created.
    pub fn begin(&mut self) {
        if let Some(robot) = &self.under_test {
            warn!(
                "New robot connected while {} is still under evaluation; saving partial results",
                robot.serial_or_unknown()
            );
            self.finish_current();
        } else {
            info!("New robot connected");
        }
        let id = self.evaluated.len();
        self.under_test = Some(RobotRecord::new(id));
    }

    /// Abandon the robot under test without persisting it (an arrival that
    /// must not be evaluated, e.g. an already-graded serial).
    pub fn reject_current(&mut self) {
        self.under_test = None;
    }

    /// Persist the robot under test and move it into the registry.
    ///
    /// Returns whether every device had passed, or `None` when no robot was
    /// under test. A persistence failure is logged; the record still enters
    /// the registry so the non-reevaluation invariant holds.
    pub fn finish_current(&mut self) -> Option<bool> {
        let robot = self.under_test.take()?;
        info!("Saving results for {}", robot.serial_or_unknown());
        if let Err(e) = self.writer.append(&robot) {
            error!(
                "Failed to persist results for {}: {e}",
                robot.serial_or_unknown()
            );
        }
        let all_ok = robot.all_ok();
        self.evaluated.push(robot);
        Some(all_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::Device;
    use tempfile::tempdir;

    fn session() -> (SessionManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("results.csv"));
        (SessionManager::new(writer), dir)
    }

    #[test]
    fn test_begin_assigns_sequential_ids() {
        let (mut session, _dir) = session();
        session.begin();
        assert_eq!(session.robot().unwrap().id, 0);
        session.finish_current();
        session.begin();
        assert_eq!(session.robot().unwrap().id, 1);
    }

    #[test]
    fn test_interruption_persists_partial_results() {
        let (mut session, _dir) = session();
        session.begin();
        session.robot_mut().unwrap().serial = Some("s1".to_string());
        session.begin();
        assert_eq!(session.evaluated().len(), 1);
        assert!(session.already_evaluated("s1"));
        assert!(session.active());
    }

    #[test]
    fn test_reject_discards_without_registry_entry() {
        let (mut session, _dir) = session();
        session.begin();
        session.reject_current();
        assert!(!session.active());
        assert!(session.evaluated().is_empty());
    }

    #[test]
    fn test_finish_reports_overall_verdict() {
        let (mut session, _dir) = session();
        session.begin();
        assert_eq!(session.finish_current(), Some(false));
        assert_eq!(session.finish_current(), None);

        session.begin();
        if let Some(robot) = session.robot_mut() {
            for device in Device::ALL {
                robot.pass(device);
            }
        }
        assert_eq!(session.finish_current(), Some(true));
        assert_eq!(session.evaluated().len(), 2);
    }
}
