//! The segment contract and its implementations.
//!
//! A segment wraps one external tool type. The core talks to it only
//! through [`Segment`]; capabilities a segment lacks fail with
//! `ConfigError::Unsupported`.

pub mod builtin;
pub mod command;
pub mod descriptor;
pub mod registry;
pub mod summary;

pub use command::{CommandSegment, CommandSpec};
pub use descriptor::{ArgumentRule, STANDARD_FAILURE_FLAGS, SegmentDefinition, SegmentDescriptor};
pub use registry::SegmentRegistry;
pub use summary::SummarySegment;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::artifacts::{AutoFile, CleanReport, CleanRequest, clean_auto_files};
use crate::config::TrackingConfig;
use crate::errors::{ConfigError, Result, TflowError};
use crate::options::ResolvedOptions;
use crate::process::{PidFile, ProcessController, StopOutcome, ToolProbe};
use crate::tracker::tail::visible_text;
use crate::tracker::{
    CompletionState, CompletionTracker, FlagRules, Inspection, TrackEvent, follow,
};

/// Everything one step invocation needs. Built fresh per step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_type: String,
    pub project_dir: PathBuf,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub options: ResolvedOptions,
    pub tracking: TrackingConfig,
    pub process: ProcessController,
}

impl StepContext {
    pub fn tracker(&self, descriptor: &SegmentDescriptor) -> CompletionTracker {
        CompletionTracker::new(descriptor, &self.log_file, self.tracking.tail_length)
    }

    pub fn auto_file(&self, kind: AutoFile) -> PathBuf {
        kind.path(&self.working_dir, &self.job_type)
    }

    pub fn pid_file(&self) -> PidFile {
        PidFile::for_job(&self.working_dir, &self.job_type)
    }

    pub fn is_pipe(&self) -> bool {
        self.options.flag("is_pipe")
    }

    /// Clean request for this step's auto files plus `extra_files`.
    pub fn clean_request(&self, extra_files: Vec<String>) -> CleanRequest<'_> {
        CleanRequest {
            job_type: &self.job_type,
            project_dir: &self.project_dir,
            working_dir: &self.working_dir,
            remove_outputs: self.options.flag("remove_outputs") || self.options.flag("reset"),
            confirm: self.options.flag("confirm"),
            extra_files,
        }
    }
}

#[async_trait]
pub trait Segment: Send + Sync {
    fn descriptor(&self) -> &SegmentDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Point-in-time completion check of the step's log.
    fn check_done(&self, ctx: &StepContext) -> Result<Inspection> {
        ctx.tracker(self.descriptor()).inspect()
    }

    async fn run(&self, _ctx: &StepContext) -> Result<()> {
        Err(unsupported(self.name(), "run"))
    }

    /// Follow the log until it fails, completes, or runs out of milestones.
    async fn track(&self, ctx: &StepContext) -> Result<CompletionState> {
        let tracker = ctx.tracker(self.descriptor());
        let rules = tracker.rules();
        follow(&tracker, ctx.tracking.poll_interval(), |event| {
            print_track_event(event, rules)
        })
        .await
    }

    /// Analysis text for a completed job, or `None` when there is nothing
    /// to analyze.
    async fn analyze(&self, _ctx: &StepContext) -> Result<Option<String>> {
        Err(unsupported(self.name(), "analyze"))
    }

    /// Replay the log verbatim.
    fn read(&self, ctx: &StepContext) -> Result<()> {
        replay_log(&ctx.log_file)
    }

    /// Check whether the underlying tool can be reached at all.
    async fn test(&self, _ctx: &StepContext, _silent: bool) -> Result<ToolProbe> {
        Err(unsupported(self.name(), "test"))
    }

    async fn stop(&self, ctx: &StepContext) -> Result<StopOutcome> {
        ctx.process.stop(&ctx.pid_file()).await
    }

    fn clean(&self, ctx: &StepContext) -> Result<CleanReport> {
        clean_auto_files(&ctx.clean_request(Vec::new()))
    }
}

pub(crate) fn unsupported(segment: &str, action: &str) -> TflowError {
    ConfigError::Unsupported {
        segment: segment.to_string(),
        action: action.to_string(),
    }
    .into()
}

/// Print a log replay, or a notice when there is no log yet.
pub fn replay_log(log_file: &Path) -> Result<()> {
    if !log_file.is_file() {
        println!(
            "{}",
            console::style(format!("Output file {} does not exist.", log_file.display())).yellow()
        );
        return Ok(());
    }
    let content = std::fs::read_to_string(log_file).map_err(|e| TflowError::io(log_file, e))?;
    println!("{}", console::style(format!("Reading {}:", log_file.display())).bold());
    for line in content.lines() {
        println!("{}", visible_text(line));
    }
    Ok(())
}

fn print_track_event(event: &TrackEvent, rules: &FlagRules) {
    match event {
        TrackEvent::Line(line) => println!("{}", visible_text(line)),
        TrackEvent::Milestone { index, name } => println!(
            "{}",
            console::style(format!(
                "  -- {}% of milestones reached ({})",
                rules.milestone_percent(index + 1),
                name
            ))
            .dim()
        ),
        TrackEvent::Failed(line) => {
            println!("{} {}", console::style("Failure detected:").red().bold(), line)
        }
        TrackEvent::Complete => {}
    }
}
