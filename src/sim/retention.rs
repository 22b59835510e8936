//! Retention memory backed by a file, so the session survives process restarts.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use crate::error::HalError;
use crate::hal::RetentionStore;

pub struct FileRetention {
    path: PathBuf,
}

impl FileRetention {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RetentionStore for FileRetention {
    fn load(&mut self) -> Result<Option<Vec<u8>>, HalError> {
        match fs::read(&self.path) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HalError::Io(format!("{}: {}", self.path.display(), e))),
        }
    }

    /// Write to a temporary file, sync, then rename over the record.
    fn commit(&mut self, record: &[u8]) -> Result<(), HalError> {
        let io = |e: std::io::Error| HalError::Io(format!("{}: {}", self.path.display(), e));
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).map_err(io)?;
        file.write_all(record).map_err(io)?;
        file.sync_all().map_err(io)?;
        fs::rename(&temp_path, &self.path).map_err(io)
    }
}
