//! Pre-recorded gestures stored as `<name>_<lamp_id>.csv`.
//!
//! The header names one column per joint plus an optional `timestamp` column, which replay
//! ignores: frames are paced by the replay fps instead.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ActuatorError;

use super::JointPositions;

const TIMESTAMP_COLUMN: &str = "timestamp";

#[derive(Debug, Clone)]
pub struct Recording {
    pub name: String,
    pub frames: Vec<JointPositions>,
}

pub fn recording_path(dir: &Path, name: &str, lamp_id: &str) -> PathBuf {
    dir.join(format!("{name}_{lamp_id}.csv"))
}

impl Recording {
    pub fn load(dir: &Path, name: &str, lamp_id: &str) -> Result<Self, ActuatorError> {
        let path = recording_path(dir, name, lamp_id);
        if !path.exists() {
            return Err(ActuatorError::RecordingNotFound(path));
        }

        let malformed = |source| ActuatorError::Recording {
            path: path.clone(),
            source,
        };

        let mut reader = csv::Reader::from_path(&path).map_err(malformed)?;
        let headers = reader.headers().map_err(malformed)?.clone();

        let mut frames = Vec::new();
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            let mut frame = JointPositions::new();
            for (column, value) in headers.iter().zip(record.iter()) {
                if column == TIMESTAMP_COLUMN {
                    continue;
                }
                let position: f64 =
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ActuatorError::RecordingValue {
                            path: path.clone(),
                            column: column.to_string(),
                            value: value.to_string(),
                        })?;
                frame.insert(column.to_string(), position);
            }
            frames.push(frame);
        }

        Ok(Self {
            name: name.to_string(),
            frames,
        })
    }
}

/// Names of the recordings available for `lamp_id`, sorted.
pub fn list_recordings(dir: &Path, lamp_id: &str) -> Vec<String> {
    let suffix = format!("_{lamp_id}.csv");
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|file| file.strip_suffix(&suffix).map(str::to_string))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_frames_without_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("nod_lamp1.csv"),
            "timestamp,base_yaw.pos,elbow_pitch.pos\n0.0,1.5,-2\n0.033,2.0,-2.5\n",
        )
        .unwrap();

        let recording = Recording::load(dir.path(), "nod", "lamp1").unwrap();
        assert_eq!(recording.frames.len(), 2);
        assert_eq!(recording.frames[1]["base_yaw.pos"], 2.0);
        assert!(!recording.frames[0].contains_key("timestamp"));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Recording::load(dir.path(), "ghost", "lamp1").unwrap_err();
        assert!(matches!(err, ActuatorError::RecordingNotFound(path) if path.ends_with("ghost_lamp1.csv")));
    }

    #[test]
    fn non_numeric_cell_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad_lamp1.csv"), "base_yaw.pos\nabc\n").unwrap();
        let err = Recording::load(dir.path(), "bad", "lamp1").unwrap_err();
        assert!(matches!(err, ActuatorError::RecordingValue { .. }));
    }

    #[test]
    fn lists_only_this_lamps_recordings() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["happy_lamp1.csv", "30_nod1_lamp1.csv", "happy_lamp2.csv", "notes.txt"] {
            fs::write(dir.path().join(file), "").unwrap();
        }
        assert_eq!(list_recordings(dir.path(), "lamp1"), vec!["30_nod1", "happy"]);
    }
}
