//! Files a step leaves beside its log: command scripts, settings snapshots,
//! timing records, PID files and hand-off files, plus cleanup of them.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::errors::{Result, TflowError};
use crate::options::{OptionValue, ResolvedOptions};

/// Suffix of the step log.
pub const LOG_SUFFIX: &str = ".out";
/// Suffix of the step report.
pub const REPORT_SUFFIX: &str = ".report";

/// Outputs removed by `clean` only when `remove_outputs` is set.
pub const OUTPUT_SUFFIXES: &[&str] = &[LOG_SUFFIX, REPORT_SUFFIX];

/// Bookkeeping files named `<job_type>.auto.<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFile {
    Command,
    Settings,
    Timing,
    Pid,
    ResultName,
    Analysis,
}

impl AutoFile {
    pub const ALL: [AutoFile; 6] = [
        AutoFile::Command,
        AutoFile::Settings,
        AutoFile::Timing,
        AutoFile::Pid,
        AutoFile::ResultName,
        AutoFile::Analysis,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            AutoFile::Command => ".auto.sh",
            AutoFile::Settings => ".auto.settings",
            AutoFile::Timing => ".auto.timing",
            AutoFile::Pid => ".auto.pid",
            AutoFile::ResultName => ".auto.result_name",
            AutoFile::Analysis => ".auto.analysis",
        }
    }

    pub fn path(self, dir: &Path, job_type: &str) -> PathBuf {
        dir.join(format!("{}{}", job_type, self.suffix()))
    }
}

/// Default log file name for a job.
pub fn log_file_name(job_type: &str) -> String {
    format!("{}{}", job_type, LOG_SUFFIX)
}

pub fn report_file_name(job_type: &str) -> String {
    format!("{}{}", job_type, REPORT_SUFFIX)
}

/// Passes one step's output path to a later step through the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffFile {
    path: PathBuf,
}

impl HandoffFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<job_type>.auto.result_name`
    pub fn for_job(dir: &Path, job_type: &str) -> Self {
        Self::new(AutoFile::ResultName.path(dir, job_type))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn publish(&self, artifact: &Path) -> Result<()> {
        std::fs::write(&self.path, format!("{}\n", artifact.display()))
            .map_err(|e| TflowError::io(&self.path, e))?;
        tracing::debug!(
            "published {} through {}",
            artifact.display(),
            self.path.display()
        );
        Ok(())
    }

    /// The published artifact path.
    pub fn read(&self) -> Result<PathBuf> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| TflowError::io(&self.path, e))?;
        let artifact = content.trim();
        if artifact.is_empty() {
            return Err(TflowError::environment(format!(
                "Hand-off file {} is empty",
                self.path.display()
            )));
        }
        Ok(PathBuf::from(artifact))
    }
}

/// Render options as `-- key value` lines, keys sorted and padded.
pub fn format_settings(options: &ResolvedOptions) -> String {
    let width = options.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in options.iter() {
        match value {
            OptionValue::List(items) => {
                out.push_str(&format!("-- {}\n", key));
                for item in items {
                    out.push_str(&format!("     {}\n", item));
                }
            }
            other => out.push_str(&format!("-- {:width$} {}\n", key, other, width = width)),
        }
    }
    out
}

pub fn write_settings_snapshot(path: &Path, options: &ResolvedOptions) -> Result<()> {
    std::fs::write(path, format_settings(options)).map_err(|e| TflowError::io(path, e))
}

/// Start/end timestamps for a step or a whole pipe.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    path: PathBuf,
    started: DateTime<Local>,
}

impl TimingRecord {
    /// Write `Start Time:` now.
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let record = Self {
            path: path.into(),
            started: Local::now(),
        };
        std::fs::write(
            &record.path,
            format!("Start Time: {}\n", format_time(&record.started)),
        )
        .map_err(|e| TflowError::io(&record.path, e))?;
        Ok(record)
    }

    /// Rewrite the file with end and total time.
    pub fn finish(self) -> Result<()> {
        let ended = Local::now();
        let total = ended.signed_duration_since(self.started);
        let content = format!(
            "Start Time: {}\nEnd Time:   {}\nTotal Time: {}\n",
            format_time(&self.started),
            format_time(&ended),
            format_elapsed(total)
        );
        std::fs::write(&self.path, content).map_err(|e| TflowError::io(&self.path, e))
    }
}

fn format_time(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_elapsed(total: chrono::TimeDelta) -> String {
    let secs = total.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Files found by `clean`, and whether they were deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub files: Vec<PathBuf>,
    pub removed: bool,
}

/// What `clean` should look for.
#[derive(Debug, Clone)]
pub struct CleanRequest<'a> {
    pub job_type: &'a str,
    pub project_dir: &'a Path,
    pub working_dir: &'a Path,
    /// Also remove `.out` and `.report`
    pub remove_outputs: bool,
    /// Delete instead of listing
    pub confirm: bool,
    /// Extra file names checked in each directory
    pub extra_files: Vec<String>,
}

/// Find the job's auto files in the project and working directories and
/// delete them when confirmed.
pub fn clean_auto_files(request: &CleanRequest<'_>) -> Result<CleanReport> {
    let mut suffixes: Vec<&str> = AutoFile::ALL.iter().map(|f| f.suffix()).collect();
    if request.remove_outputs {
        suffixes.extend_from_slice(OUTPUT_SUFFIXES);
    }

    let mut dirs = vec![request.project_dir];
    if request.working_dir != request.project_dir {
        dirs.push(request.working_dir);
    }

    let mut files = Vec::new();
    for dir in dirs {
        for suffix in &suffixes {
            let candidate = dir.join(format!("{}{}", request.job_type, suffix));
            if candidate.is_file() {
                files.push(candidate);
            }
        }
        for name in &request.extra_files {
            let candidate = dir.join(name);
            if candidate.is_file() {
                files.push(candidate);
            }
        }
    }

    if request.confirm {
        for file in &files {
            std::fs::remove_file(file).map_err(|e| TflowError::io(file, e))?;
            tracing::debug!("removed {}", file.display());
        }
    }

    Ok(CleanReport {
        removed: request.confirm && !files.is_empty(),
        files,
    })
}
