//! End-to-end qualification of a simulated robot.
//!
//! Wires the sequencer to the simulated bench (scripted robot + operator)
//! and runs the whole protocol under a paused clock: every device must
//! pass, the unit must land in the evaluated registry, and exactly one
//! PASS row must be appended to the results file.

use std::time::Duration;

use robot_qc::config::Settings;
use robot_qc::prompt::LogConsole;
use robot_qc::robot::Device;
use robot_qc::sim::SimRobot;
use robot_qc::Sequencer;

#[tokio::test(start_paused = true)]
async fn test_simulated_robot_passes_full_qualification() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.csv");
    let mut settings = Settings::default();
    settings.output.results_file = results.clone();

    let sim = SimRobot::new(Duration::from_secs(360)).with_seed(42);
    let estimator = sim.matching_estimator();
    let (mut sequencer, link) =
        Sequencer::new(settings, Box::new(LogConsole), Box::new(estimator));

    let bench = tokio::spawn(sim.run(link));
    sequencer.run().await.unwrap();
    bench.await.unwrap();

    let evaluated = sequencer.session().evaluated();
    assert_eq!(evaluated.len(), 1, "exactly one robot should be retired");
    let robot = &evaluated[0];
    assert!(robot.serial.is_some());
    for device in Device::ALL {
        assert!(
            robot.device(device).ok,
            "device {} did not pass",
            device.name()
        );
    }
    assert!(robot.all_ok());

    let mut reader = csv::Reader::from_path(&results).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][5], "PASS");
}

#[tokio::test(start_paused = true)]
async fn test_reconnecting_unit_is_not_reevaluated() {
    use robot_qc::events::{ConnectionEvent, Event, VersionInfo};

    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.csv");
    let mut settings = Settings::default();
    settings.output.results_file = results.clone();

    let sim = SimRobot::new(Duration::from_secs(300)).with_seed(7);
    let estimator = sim.matching_estimator();
    let (mut sequencer, link) =
        Sequencer::new(settings, Box::new(LogConsole), Box::new(estimator));

    // After the simulated session ends, the same unit shows up again:
    // same unique device id the simulator announces for seed 7.
    let events = link.events.clone();
    let bench = tokio::spawn(async move {
        sim.run(link).await;
        let _ = events.send(Event::Connection(ConnectionEvent::Online));
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = events.send(Event::VersionInfo(VersionInfo {
            udid: [0x00c0_ffee, 7, 0x2a],
            hardware: 0x0001_0200,
            firmware: 0x0001_0103,
            software: 0x0002_0000,
        }));
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    sequencer.run().await.unwrap();
    bench.await.unwrap();

    // One registry entry from the real evaluation; the re-arrival was
    // rejected before entering evaluation.
    assert_eq!(sequencer.session().evaluated().len(), 1);
    assert!(!sequencer.session().active());

    let mut reader = csv::Reader::from_path(&results).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 1);
}
