//! Verdict persistence.
//!
//! One CSV row per evaluated robot, appended to the configured results
//! file. The header is written once, when the file is created or empty;
//! later sessions keep appending to the same file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::QcResult;
use crate::robot::{Device, RobotRecord};

/// Appends robot verdict rows to a CSV file.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    /// Create a writer targeting `path`; nothing is opened until the first
    /// append.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header() -> Vec<String> {
        let mut columns = vec![
            "time".to_string(),
            "id".to_string(),
            "serial".to_string(),
            "version".to_string(),
            "health".to_string(),
            "overall".to_string(),
        ];
        for device in Device::ALL {
            columns.push(format!("{}_value", device.name()));
            columns.push(format!("{}_ok", device.name()));
        }
        columns
    }

    fn row(robot: &RobotRecord) -> Vec<String> {
        let mut fields = vec![
            chrono::Utc::now().to_rfc3339(),
            robot.id.to_string(),
            robot.serial_or_unknown().to_string(),
            robot
                .version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format!("{:?}", robot.state()),
            if robot.all_ok() { "PASS" } else { "FAILED" }.to_string(),
        ];
        for device in Device::ALL {
            let report = robot.device(device);
            fields.push(report.value.to_string());
            fields.push(report.ok.to_string());
        }
        fields
    }

    /// Append one verdict row, writing the header first on a fresh file.
    pub fn append(&self, robot: &RobotRecord) -> QcResult<()> {
        let fresh = std::fs::metadata(&self.path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);

        if fresh {
            writer.write_record(Self::header())?;
        }
        writer.write_record(Self::row(robot))?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_written_once_and_rows_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let writer = ReportWriter::new(&path);

        let mut robot = RobotRecord::new(0);
        robot.serial = Some("00000001-00000002-00000003".to_string());
        for device in Device::ALL {
            robot.pass(device);
        }
        writer.append(&robot).unwrap();

        let second = RobotRecord::new(1);
        writer.append(&second).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 6 + 2 * Device::COUNT);
        assert_eq!(&headers[0], "time");
        assert_eq!(&headers[5], "overall");

        let rows: Vec<csv::StringRecord> =
            reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][5], "PASS");
        assert_eq!(&rows[0][2], "00000001-00000002-00000003");
        assert_eq!(&rows[1][5], "FAILED");
        assert_eq!(&rows[1][2], "<unknown>");
    }
}
