//! The Process Record: one plain-text PID file per running step.

use std::path::{Path, PathBuf};

use crate::artifacts::AutoFile;
use crate::errors::{Result, TflowError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<working_dir>/<job_type>.auto.pid`
    pub fn for_job(working_dir: &Path, job_type: &str) -> Self {
        Self::new(AutoFile::Pid.path(working_dir, job_type))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        std::fs::write(&self.path, format!("{}\n", pid)).map_err(|e| TflowError::io(&self.path, e))?;
        tracing::debug!("wrote pid {} to {}", pid, self.path.display());
        Ok(())
    }

    /// The recorded id, or `None` when no file exists.
    pub fn read(&self) -> Result<Option<u32>> {
        if !self.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| TflowError::io(&self.path, e))?;
        let trimmed = content.trim();
        trimmed.parse::<u32>().map(Some).map_err(|_| {
            TflowError::environment(format!(
                "PID file {} does not contain a process id: '{}'",
                self.path.display(),
                trimmed
            ))
        })
    }

    /// Delete the file. Refuses anything whose name lacks `pid` or whose
    /// content is more than a single token.
    pub fn remove(&self) -> Result<()> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.contains("pid") {
            return Err(TflowError::environment(format!(
                "Refusing to delete {}: not a PID file name",
                self.path.display()
            )));
        }
        if !self.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| TflowError::io(&self.path, e))?;
        if content.split_whitespace().count() > 1 {
            return Err(TflowError::environment(format!(
                "Refusing to delete {}: content is not a single process id",
                self.path.display()
            )));
        }

        std::fs::remove_file(&self.path).map_err(|e| TflowError::io(&self.path, e))
    }
}
