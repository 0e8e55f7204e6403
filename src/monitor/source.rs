use std::{fs, io, path::PathBuf};

use crate::error::SourceError;

use super::rating::parse_latest_rating;

/// Where the latest focus rating comes from. Reads may block; the monitor calls them on the
/// blocking pool.
pub trait RatingSource: Send + Sync {
    /// `Ok(None)` when the source has no rating yet.
    fn latest_rating(&self) -> Result<Option<i32>, SourceError>;
}

/// Detection log written by the vision pipeline.
pub struct FileRatingSource {
    path: PathBuf,
    marker: String,
}

impl FileRatingSource {
    pub fn new(path: PathBuf, marker: impl Into<String>) -> Self {
        Self {
            path,
            marker: marker.into(),
        }
    }
}

impl RatingSource for FileRatingSource {
    fn latest_rating(&self) -> Result<Option<i32>, SourceError> {
        let content = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            // the pipeline may not have written anything yet
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SourceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(parse_latest_rating(
            &String::from_utf8_lossy(&content),
            &self.marker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn reads_appended_ratings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let source = FileRatingSource::new(file.path().to_path_buf(), "rating:");

        assert_eq!(source.latest_rating().unwrap(), None);
        writeln!(file, "rating: 21").unwrap();
        assert_eq!(source.latest_rating().unwrap(), Some(21));
        writeln!(file, "rating: 11").unwrap();
        assert_eq!(source.latest_rating().unwrap(), Some(11));
    }

    #[test]
    fn absent_file_has_no_rating() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileRatingSource::new(dir.path().join("detection_log.txt"), "rating:");
        assert_eq!(source.latest_rating().unwrap(), None);
    }
}
