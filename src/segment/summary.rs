//! In-process segment that merges the step reports of a pipe.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::descriptor::SegmentDescriptor;
use super::{Segment, StepContext};
use crate::artifacts::REPORT_SUFFIX;
use crate::errors::{Result, TflowError};
use crate::process::{StopOutcome, ToolProbe};
use crate::report::{SEPARATOR, combine_reports, read_report};

const SUMMARY_REPORT: &str = "Summary.report";
const SUMMARY_CSV: &str = "Summary.report.csv";

#[derive(Debug, Clone)]
pub struct SummarySegment {
    descriptor: SegmentDescriptor,
}

impl Default for SummarySegment {
    fn default() -> Self {
        Self::new()
    }
}

impl SummarySegment {
    pub fn new() -> Self {
        Self {
            descriptor: SegmentDescriptor::new("Summary")
                .with_milestones(["Creating Summary Report", "Summary Complete"])
                .with_required(["write_report", "write_csv_report"])
                .with_default("write_report", true)
                .with_default("write_csv_report", true),
        }
    }

    /// Report files under `working_dir`: those named after `pipe_steps`
    /// first, in step order, then everything else in path order.
    pub fn collect_reports(working_dir: &Path, pipe_steps: &[String]) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(working_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.ends_with(REPORT_SUFFIX) && n != SUMMARY_REPORT)
            })
            .collect();

        let mut ordered = Vec::new();
        for step in pipe_steps {
            let expected = format!("{}{}", step, REPORT_SUFFIX);
            if let Some(pos) = found
                .iter()
                .position(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == expected))
            {
                ordered.push(found.remove(pos));
            }
        }
        ordered.extend(found);
        ordered
    }

    /// Build the summary text and, when enabled, write the combined reports.
    pub fn summarize(&self, ctx: &StepContext) -> Result<String> {
        let steps = ctx.options.list("pipe_steps");
        let mut analysis = if steps.is_empty() {
            "Looking for job reports.\n".to_string()
        } else {
            format!(
                "Looking for job reports for pipe steps: {}\n",
                steps.join(", ")
            )
        };

        let files = Self::collect_reports(&ctx.working_dir, &steps);
        if files.is_empty() {
            analysis.push_str("No report files found.\n");
            return Ok(analysis);
        }

        analysis.push_str("Report files found:\n");
        for file in &files {
            analysis.push_str(&format!(" -- {}\n", file.display()));
        }
        analysis.push('\n');

        let mut records = Vec::new();
        for file in &files {
            let text = std::fs::read_to_string(file).map_err(|e| TflowError::io(file, e))?;
            let base = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            analysis.push_str(&format!("{}\n{}\n\n", base, text.trim()));
            let name = base.strip_suffix(REPORT_SUFFIX).unwrap_or(&base).to_string();
            records.push((name, read_report(&text)));
        }

        let combined = combine_reports(&records, SEPARATOR);
        analysis.push_str(&format!("\nCombined Report:\n{}\n", combined));

        if ctx.options.flag("write_report") {
            let path = ctx.working_dir.join(SUMMARY_REPORT);
            std::fs::write(&path, &combined).map_err(|e| TflowError::io(&path, e))?;
            if ctx.options.flag("write_csv_report") {
                let path = ctx.working_dir.join(SUMMARY_CSV);
                std::fs::write(&path, combine_reports(&records, ","))
                    .map_err(|e| TflowError::io(&path, e))?;
            }
        }

        Ok(analysis)
    }
}

#[async_trait]
impl Segment for SummarySegment {
    fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let body = self.summarize(ctx)?;
        let log = format!("Creating Summary Report\n{}Summary Complete.\n", body);
        std::fs::write(&ctx.log_file, &log).map_err(|e| TflowError::io(&ctx.log_file, e))?;
        if !ctx.is_pipe() {
            print!("{}", log);
        }
        Ok(())
    }

    async fn analyze(&self, ctx: &StepContext) -> Result<Option<String>> {
        self.summarize(ctx).map(Some)
    }

    async fn test(&self, _ctx: &StepContext, _silent: bool) -> Result<ToolProbe> {
        Ok(ToolProbe::Found {
            output: "Summary is built into tflow.\n".to_string(),
        })
    }

    async fn stop(&self, _ctx: &StepContext) -> Result<StopOutcome> {
        Ok(StopOutcome::NotApplicable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::options::{OptionValue, ResolvedOptions};
    use crate::process::ProcessController;
    use crate::report::{Report, ReportKind, write_report};
    use crate::tracker::CompletionState;
    use tempfile::tempdir;

    fn context(dir: &Path, steps: &[&str]) -> StepContext {
        let mut options = ResolvedOptions::from(SummarySegment::new().descriptor.default_settings);
        options.insert("is_pipe", true);
        options.insert(
            "pipe_steps",
            OptionValue::list(steps.iter().copied()),
        );
        StepContext {
            job_type: "Summary".into(),
            project_dir: dir.to_path_buf(),
            working_dir: dir.to_path_buf(),
            log_file: dir.join("Summary.out"),
            options,
            tracking: TrackingConfig::default(),
            process: ProcessController::default(),
        }
    }

    #[test]
    fn reports_follow_pipe_step_order() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("CAP3")).unwrap();
        std::fs::write(dir.path().join("CAP3/CAP3.report"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("Trinity.report"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("Extra.report"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("Summary.report"), "old").unwrap();

        let files = SummarySegment::collect_reports(
            dir.path(),
            &["Trinity".to_string(), "CAP3".to_string()],
        );
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Trinity.report", "CAP3.report", "Extra.report"]);
    }

    #[tokio::test]
    async fn run_writes_combined_reports_and_completes_log() {
        let dir = tempdir().unwrap();
        write_report(
            &dir.path().join("Trinity.report"),
            &Report::new(ReportKind::Sequence).with("Count", "10"),
            &[],
        )
        .unwrap();
        write_report(
            &dir.path().join("CAP3.report"),
            &Report::new(ReportKind::Sequence).with("Count", "7"),
            &[],
        )
        .unwrap();

        let segment = SummarySegment::new();
        let ctx = context(dir.path(), &["Trinity", "CAP3"]);
        segment.run(&ctx).await.unwrap();

        let combined = std::fs::read_to_string(dir.path().join("Summary.report")).unwrap();
        let lines: Vec<&str> = combined.lines().collect();
        assert_eq!(lines[0], "SEQUENCE FILE REPORTS");
        assert!(lines[2].starts_with("Trinity\t10\t"));
        assert!(lines[3].starts_with("CAP3\t7\t"));
        let csv = std::fs::read_to_string(dir.path().join("Summary.report.csv")).unwrap();
        assert!(csv.contains("Trinity,10,"));

        assert_eq!(
            segment.check_done(&ctx).unwrap().state,
            CompletionState::Complete
        );
    }

    #[tokio::test]
    async fn no_reports_still_completes() {
        let dir = tempdir().unwrap();
        let segment = SummarySegment::new();
        let ctx = context(dir.path(), &[]);
        segment.run(&ctx).await.unwrap();
        let log = std::fs::read_to_string(dir.path().join("Summary.out")).unwrap();
        assert!(log.contains("No report files found."));
        assert!(log.ends_with("Summary Complete.\n"));
        assert!(!dir.path().join("Summary.report").exists());
    }

    #[tokio::test]
    async fn stop_is_not_applicable() {
        let dir = tempdir().unwrap();
        let outcome = SummarySegment::new()
            .stop(&context(dir.path(), &[]))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::NotApplicable);
    }
}
