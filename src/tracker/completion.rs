//! Point-in-time classification of a step's log.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::tail::read_tail;
use crate::errors::{Result, TflowError};
use crate::segment::SegmentDescriptor;

/// Where a job stands, as far as its log can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    /// Log absent or empty
    NotStarted,
    Running,
    Failed,
    Complete,
}

impl std::fmt::Display for CompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionState::NotStarted => write!(f, "not started"),
            CompletionState::Running => write!(f, "running"),
            CompletionState::Failed => write!(f, "failed"),
            CompletionState::Complete => write!(f, "complete"),
        }
    }
}

/// The three flag sets matched against log lines by substring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagRules {
    pub milestones: Vec<String>,
    /// Includes the final milestone.
    pub terminal_flags: Vec<String>,
    pub failure_flags: Vec<String>,
}

impl FlagRules {
    pub fn new(milestones: Vec<String>, terminal_flags: Vec<String>, failure_flags: Vec<String>) -> Self {
        let mut terminal_flags = terminal_flags;
        if let Some(last) = milestones.last()
            && !terminal_flags.contains(last)
        {
            terminal_flags.push(last.clone());
        }
        Self {
            milestones,
            terminal_flags,
            failure_flags,
        }
    }

    pub fn from_descriptor(descriptor: &SegmentDescriptor) -> Self {
        Self::new(
            descriptor.milestones.clone(),
            descriptor.terminal_flags.clone(),
            descriptor.failure_flags.clone(),
        )
    }

    /// Share of milestones covered once `reached` of them have been seen.
    pub fn milestone_percent(&self, reached: usize) -> usize {
        match self.milestones.len() {
            0 => 0,
            total => reached.min(total) * 100 / total,
        }
    }

    pub fn is_failure(&self, line: &str) -> bool {
        self.failure_flags.iter().any(|flag| line.contains(flag.as_str()))
    }

    pub fn is_terminal(&self, line: &str) -> bool {
        self.terminal_flags.iter().any(|flag| line.contains(flag.as_str()))
    }

    /// Classify a tail window. Any failure line wins over any terminal
    /// line, wherever each sits in the window.
    pub fn classify(&self, window: &[String]) -> CompletionState {
        if window.is_empty() {
            return CompletionState::NotStarted;
        }
        if window.iter().rev().any(|line| self.is_failure(line)) {
            return CompletionState::Failed;
        }
        if window.iter().rev().any(|line| self.is_terminal(line)) {
            return CompletionState::Complete;
        }
        CompletionState::Running
    }
}

/// State plus the tail window it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub state: CompletionState,
    pub tail: Vec<String>,
}

/// Answers "is this step done?" for one segment's log file.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    segment: String,
    log_file: PathBuf,
    rules: FlagRules,
    tail_length: usize,
}

impl CompletionTracker {
    pub fn new(descriptor: &SegmentDescriptor, log_file: impl Into<PathBuf>, tail_length: usize) -> Self {
        Self {
            segment: descriptor.name.clone(),
            log_file: log_file.into(),
            rules: FlagRules::from_descriptor(descriptor),
            tail_length,
        }
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn rules(&self) -> &FlagRules {
        &self.rules
    }

    pub fn tail_length(&self) -> usize {
        self.tail_length
    }

    /// Read the tail window and classify it.
    pub fn inspect(&self) -> Result<Inspection> {
        if !self.log_file.is_file() {
            return Ok(Inspection {
                state: CompletionState::NotStarted,
                tail: Vec::new(),
            });
        }
        let tail = read_tail(&self.log_file, self.tail_length)
            .map_err(|e| TflowError::io(&self.log_file, e))?;
        let state = self.rules.classify(&tail);
        tracing::debug!(
            "{} log {} classified as {}",
            self.segment,
            self.log_file.display(),
            state
        );
        Ok(Inspection { state, tail })
    }

    /// `Ok(true)` when complete, `Ok(false)` when not yet, and the fatal
    /// failure report when the log shows a failure flag.
    pub fn check_completion(&self) -> Result<bool> {
        let inspection = self.inspect()?;
        match inspection.state {
            CompletionState::Failed => Err(self.failure(inspection.tail)),
            CompletionState::Complete => Ok(true),
            CompletionState::Running | CompletionState::NotStarted => Ok(false),
        }
    }

    /// The fatal report for a failed log, carrying the tail as context.
    pub fn failure(&self, tail: Vec<String>) -> TflowError {
        TflowError::ExternalToolFailure {
            segment: self.segment.clone(),
            log_file: self.log_file.clone(),
            tail,
        }
    }
}
