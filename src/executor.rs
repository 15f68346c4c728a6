//! The Step Executor: one segment, one mode, one freshly resolved option set.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::artifacts::{AutoFile, CleanReport, HandoffFile, TimingRecord, format_settings, write_settings_snapshot};
use crate::config::TflowConfig;
use crate::errors::{ConfigError, Result, TflowError};
use crate::options::ResolvedOptions;
use crate::process::{ProcessController, StopOutcome, ToolProbe, process_exists};
use crate::segment::{Segment, StepContext};
use crate::tracker::CompletionState;

/// What the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Run,
    Track,
    Analyze,
    Read,
    Test,
    Stop,
    Clean,
    PrintSettings,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Run => "run",
            Mode::Track => "track",
            Mode::Analyze => "analyze",
            Mode::Read => "read",
            Mode::Test => "test",
            Mode::Stop => "stop",
            Mode::Clean => "clean",
            Mode::PrintSettings => "print_settings",
        }
    }

    /// Banner verb, e.g. "Running".
    pub fn gerund(self) -> &'static str {
        match self {
            Mode::Run => "Running",
            Mode::Track => "Tracking",
            Mode::Analyze => "Analyzing",
            Mode::Read => "Reading",
            Mode::Test => "Testing",
            Mode::Stop => "Stopping",
            Mode::Clean => "Cleaning",
            Mode::PrintSettings => "Printing settings for",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "run" => Ok(Mode::Run),
            "track" => Ok(Mode::Track),
            "analyze" => Ok(Mode::Analyze),
            "read" => Ok(Mode::Read),
            "test" => Ok(Mode::Test),
            "stop" => Ok(Mode::Stop),
            "clean" => Ok(Mode::Clean),
            "print_settings" => Ok(Mode::PrintSettings),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// What happened when a step was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// `run` found a complete log and did nothing
    AlreadyComplete,
    Ran,
    Tracked(CompletionState),
    Analyzed(Option<String>),
    /// `analyze` on a job that is not complete
    NotReady(CompletionState),
    Read,
    Tested(ToolProbe),
    Stopped(StopOutcome),
    Cleaned(CleanReport),
    PrintedSettings,
}

/// Option key naming a hand-off file, relative to the project directory.
pub const HANDOFF_KEY: &str = "result_name_file";
/// Option key a hand-off fills in.
pub const HANDOFF_TARGET: &str = "input_file";

pub struct StepExecutor<'a> {
    config: &'a TflowConfig,
    controller: ProcessController,
}

impl<'a> StepExecutor<'a> {
    pub fn new(config: &'a TflowConfig) -> Self {
        Self {
            config,
            controller: ProcessController::new(&config.process),
        }
    }

    /// Working directory of a stand-alone step: `working_directory` under
    /// the project directory, or the project directory itself.
    pub fn working_dir_for(options: &ResolvedOptions, project_dir: &Path) -> PathBuf {
        match options.text("working_directory") {
            Some(dir) if !dir.is_empty() => {
                let path = PathBuf::from(dir);
                if path.is_absolute() {
                    path
                } else {
                    project_dir.join(path)
                }
            }
            _ => project_dir.to_path_buf(),
        }
    }

    /// Check `required_settings`, counting a pending hand-off as providing
    /// its target key.
    pub fn verify_required(segment: &dyn Segment, options: &ResolvedOptions) -> Result<()> {
        let required = &segment.descriptor().required_settings;
        if options.contains(HANDOFF_KEY) && !options.contains(HANDOFF_TARGET) {
            let mut pending = options.clone();
            pending.insert(HANDOFF_TARGET, "");
            pending.require(segment.name(), required)?;
        } else {
            options.require(segment.name(), required)?;
        }
        Ok(())
    }

    /// Build the context for one step: apply the hand-off, pick the log
    /// file, and record the paths the segment will see.
    pub fn prepare(
        &self,
        segment: &dyn Segment,
        mode: Mode,
        mut options: ResolvedOptions,
        project_dir: &Path,
        working_dir: PathBuf,
    ) -> Result<StepContext> {
        let job_type = segment.name().to_string();

        if !options.contains(HANDOFF_TARGET)
            && let Some(name) = options.text(HANDOFF_KEY)
        {
            let handoff = HandoffFile::new(project_dir.join(name));
            if handoff.path().is_file() {
                let input = handoff.read()?;
                tracing::info!(
                    "{} takes {} from {}",
                    job_type,
                    input.display(),
                    handoff.path().display()
                );
                options.insert(HANDOFF_TARGET, input.display().to_string());
            } else if mode == Mode::Run {
                return Err(TflowError::environment(format!(
                    "Hand-off file {} for {} not found",
                    handoff.path().display(),
                    job_type
                )));
            }
        }

        let log_file = options
            .path_under("out_file", &working_dir)
            .unwrap_or_else(|| working_dir.join(segment.descriptor().default_log_name()));

        options.insert("job_type", job_type.clone());
        options.insert("mode", mode.as_str());
        options.insert("project_directory", project_dir.display().to_string());
        options.insert("working_directory", working_dir.display().to_string());
        options.insert("out_file", log_file.display().to_string());

        Ok(StepContext {
            job_type,
            project_dir: project_dir.to_path_buf(),
            working_dir,
            log_file,
            options,
            tracking: self.config.tracking.clone(),
            process: self.controller.clone(),
        })
    }

    /// Dispatch `mode` for one step.
    pub async fn execute(&self, segment: &dyn Segment, mode: Mode, ctx: &StepContext) -> Result<StepOutcome> {
        let name = segment.name();
        tracing::debug!("{} {} with options {:?}", mode.gerund(), name, ctx.options);

        if !ctx.working_dir.is_dir() && !matches!(mode, Mode::Run | Mode::Test | Mode::PrintSettings) {
            tracing::warn!(
                "Working directory {} for {} does not exist",
                ctx.working_dir.display(),
                name
            );
        }

        match mode {
            Mode::Run => self.run(segment, ctx).await,
            Mode::Track => self.track(segment, ctx).await,
            Mode::Analyze => self.analyze(segment, ctx).await,
            Mode::Read => {
                segment.read(ctx)?;
                Ok(StepOutcome::Read)
            }
            Mode::Test => self.test(segment, ctx).await,
            Mode::Stop => self.stop(segment, ctx).await,
            Mode::Clean => self.clean(segment, ctx),
            Mode::PrintSettings => {
                print!("{}", format_settings(&ctx.options));
                Ok(StepOutcome::PrintedSettings)
            }
        }
    }

    async fn run(&self, segment: &dyn Segment, ctx: &StepContext) -> Result<StepOutcome> {
        let name = segment.name();
        let tracker = ctx.tracker(segment.descriptor());
        let overwrite = ctx.options.flag("overwrite");

        let before = segment.check_done(ctx)?;
        match before.state {
            CompletionState::Failed => return Err(tracker.failure(before.tail)),
            CompletionState::Complete if !overwrite => {
                println!("{}", console::style(format!("{} job already complete.", name)).green());
                return Ok(StepOutcome::AlreadyComplete);
            }
            _ => {}
        }

        Self::verify_required(segment, &ctx.options)?;

        if before.state == CompletionState::Running
            && let Some(pid) = ctx.pid_file().read()?
            && process_exists(pid)
        {
            return Err(TflowError::environment(format!(
                "{} job is still running as process {}. Use track to follow it or stop to end it.",
                name, pid
            )));
        }

        if !ctx.working_dir.is_dir() {
            println!("Making new working directory: {}", ctx.working_dir.display());
            std::fs::create_dir_all(&ctx.working_dir).map_err(|e| TflowError::io(&ctx.working_dir, e))?;
        }
        // Each attempt starts a fresh log; a leftover one is from an
        // interrupted attempt or an overwrite.
        if ctx.log_file.is_file() {
            tracing::info!("Replacing previous log {}", ctx.log_file.display());
            std::fs::remove_file(&ctx.log_file).map_err(|e| TflowError::io(&ctx.log_file, e))?;
        }

        let timing = if ctx.options.flag("write_times") {
            Some(TimingRecord::start(ctx.auto_file(AutoFile::Timing))?)
        } else {
            None
        };

        println!("{}", console::style(format!("Running {} job...", name)).bold());
        match segment.run(ctx).await {
            Ok(()) => {}
            Err(err @ TflowError::ToolExited { .. }) => {
                let after = segment.check_done(ctx)?;
                if after.state == CompletionState::Failed {
                    return Err(tracker.failure(after.tail));
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        if let Some(timing) = timing {
            timing.finish()?;
        }
        if ctx.options.flag("write_settings") {
            write_settings_snapshot(&ctx.auto_file(AutoFile::Settings), &ctx.options)?;
        }

        let after = segment.check_done(ctx)?;
        match after.state {
            CompletionState::Failed => Err(tracker.failure(after.tail)),
            CompletionState::Complete => {
                println!("{}", console::style(format!("{} job complete.", name)).green());
                Ok(StepOutcome::Ran)
            }
            state => {
                tracing::warn!("{} finished but its log reads as {}", name, state);
                Ok(StepOutcome::Ran)
            }
        }
    }

    async fn track(&self, segment: &dyn Segment, ctx: &StepContext) -> Result<StepOutcome> {
        let name = segment.name();
        let tracker = ctx.tracker(segment.descriptor());

        let before = segment.check_done(ctx)?;
        match before.state {
            CompletionState::Failed => Err(tracker.failure(before.tail)),
            CompletionState::Complete => {
                println!("{}", console::style(format!("{} job already complete.", name)).green());
                Ok(StepOutcome::Tracked(CompletionState::Complete))
            }
            CompletionState::NotStarted => Err(TflowError::environment(format!(
                "{} output file {} not found, nothing to track",
                name,
                ctx.log_file.display()
            ))),
            CompletionState::Running => {
                println!("{}", console::style(format!("Tracking {} job...", name)).bold());
                match segment.track(ctx).await? {
                    CompletionState::Failed => {
                        let after = segment.check_done(ctx)?;
                        Err(tracker.failure(after.tail))
                    }
                    state => {
                        println!("{}", console::style(format!("{} job complete.", name)).green());
                        Ok(StepOutcome::Tracked(state))
                    }
                }
            }
        }
    }

    async fn analyze(&self, segment: &dyn Segment, ctx: &StepContext) -> Result<StepOutcome> {
        let name = segment.name();
        let state = segment.check_done(ctx)?.state;
        if state != CompletionState::Complete {
            println!(
                "{}",
                console::style(format!("{} job not yet complete, cannot analyze.", name)).yellow()
            );
            return Ok(StepOutcome::NotReady(state));
        }

        let analysis = segment.analyze(ctx).await?;
        if let Some(text) = &analysis {
            print!("{}", text);
            if ctx.options.flag("write_analysis") {
                let path = ctx.auto_file(AutoFile::Analysis);
                std::fs::write(&path, text).map_err(|e| TflowError::io(&path, e))?;
            }
        }
        Ok(StepOutcome::Analyzed(analysis))
    }

    async fn test(&self, segment: &dyn Segment, ctx: &StepContext) -> Result<StepOutcome> {
        let silent = !ctx.options.flag("print_test_output");
        let probe = segment.test(ctx, silent).await?;
        match &probe {
            ToolProbe::Found { .. } => println!(" -- {} found!", segment.name()),
            ToolProbe::Unavailable { message } => println!(
                " -- {} {} ({})",
                segment.name(),
                console::style("not found").red(),
                message
            ),
        }
        Ok(StepOutcome::Tested(probe))
    }

    async fn stop(&self, segment: &dyn Segment, ctx: &StepContext) -> Result<StepOutcome> {
        let name = segment.name();
        let outcome = segment.stop(ctx).await?;
        match outcome {
            StopOutcome::NotFound => println!("    {} job PID not found.", name),
            StopOutcome::NotActive { pid } => {
                println!("    {} job PID found: {}  Process not active.", name, pid)
            }
            StopOutcome::Killed { pid } => {
                println!("    {} job PID found: {}  Process killed.", name, pid)
            }
            StopOutcome::NotApplicable => println!("    {} job stopping not applicable.", name),
        }
        Ok(StepOutcome::Stopped(outcome))
    }

    fn clean(&self, segment: &dyn Segment, ctx: &StepContext) -> Result<StepOutcome> {
        let report = segment.clean(ctx)?;
        if report.files.is_empty() {
            println!("No files found to clean.");
        } else {
            println!(
                "{}",
                if report.removed {
                    "Cleaning files:"
                } else {
                    "Would clean files:"
                }
            );
            for file in &report.files {
                println!("    {}", file.display());
            }
            if report.removed {
                println!("Complete.");
            } else {
                println!("Rerun with --confirm to perform cleaning.");
            }
        }
        Ok(StepOutcome::Cleaned(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionValue;
    use crate::segment::{CommandSegment, CommandSpec, SegmentDescriptor};
    use tempfile::tempdir;

    fn foo_segment(script: &str) -> CommandSegment {
        CommandSegment::new(
            SegmentDescriptor::new("Foo")
                .with_milestones(["Started", "Step1", "Done"])
                .with_failure_flags(["Traceback"])
                .with_required(["command_list"])
                .with_default("command_list", OptionValue::list(["sh", "-c", script])),
            CommandSpec::default(),
        )
    }

    fn options_for(segment: &CommandSegment) -> ResolvedOptions {
        let mut options = ResolvedOptions::from(crate::config::builtin_global_defaults());
        for (key, value) in &segment.descriptor().default_settings {
            options.insert(key.clone(), value.clone());
        }
        options
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("run".parse::<Mode>().unwrap(), Mode::Run);
        assert_eq!("print_settings".parse::<Mode>().unwrap(), Mode::PrintSettings);
        assert!(matches!(
            "explode".parse::<Mode>(),
            Err(ConfigError::UnknownMode(m)) if m == "explode"
        ));
    }

    #[test]
    fn working_dir_defaults_to_project() {
        let project = Path::new("/proj");
        let mut options = ResolvedOptions::default();
        assert_eq!(StepExecutor::working_dir_for(&options, project), project);
        options.insert("working_directory", "");
        assert_eq!(StepExecutor::working_dir_for(&options, project), project);
        options.insert("working_directory", "CAP3");
        assert_eq!(
            StepExecutor::working_dir_for(&options, project),
            PathBuf::from("/proj/CAP3")
        );
    }

    #[tokio::test]
    async fn run_spawns_once_then_reports_complete() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let counter = dir.path().join("spawns");
        let segment = foo_segment(&format!(
            "echo x >> {}; echo Started; echo Step1; echo Done",
            counter.display()
        ));

        for expected in [StepOutcome::Ran, StepOutcome::AlreadyComplete] {
            let ctx = executor
                .prepare(&segment, Mode::Run, options_for(&segment), dir.path(), dir.path().to_path_buf())
                .unwrap();
            assert_eq!(executor.execute(&segment, Mode::Run, &ctx).await.unwrap(), expected);
        }
        assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 1);
        assert!(dir.path().join("Foo.auto.settings").exists());
        assert!(
            std::fs::read_to_string(dir.path().join("Foo.auto.timing"))
                .unwrap()
                .contains("Total Time")
        );
    }

    #[tokio::test]
    async fn failed_log_is_fatal_for_run() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("echo Started; echo Traceback; echo Done");

        let ctx = executor
            .prepare(&segment, Mode::Run, options_for(&segment), dir.path(), dir.path().to_path_buf())
            .unwrap();
        let err = executor.execute(&segment, Mode::Run, &ctx).await.unwrap_err();
        assert!(matches!(err, TflowError::ExternalToolFailure { .. }));
        assert!(err.to_string().contains("delete output file"));

        // the failed log blocks a second attempt too
        let err = executor.execute(&segment, Mode::Run, &ctx).await.unwrap_err();
        assert!(matches!(err, TflowError::ExternalToolFailure { .. }));
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_failure_with_tail() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("echo Started; exit 2");
        let ctx = executor
            .prepare(&segment, Mode::Run, options_for(&segment), dir.path(), dir.path().to_path_buf())
            .unwrap();
        // "Traceback" is the only failure flag, so the appended
        // "Exiting Early..." does not classify as failed here
        let err = executor.execute(&segment, Mode::Run, &ctx).await.unwrap_err();
        assert!(matches!(err, TflowError::ToolExited { code: 2, .. }));
    }

    #[tokio::test]
    async fn missing_required_setting_spawns_nothing() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("echo Started");
        let mut options = options_for(&segment);
        options.remove("command_list");

        let ctx = executor
            .prepare(&segment, Mode::Run, options, dir.path(), dir.path().to_path_buf())
            .unwrap();
        let err = executor.execute(&segment, Mode::Run, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            TflowError::Config(ConfigError::MissingRequiredSetting { .. })
        ));
        assert!(!dir.path().join("Foo.out").exists());
    }

    #[tokio::test]
    async fn analyze_waits_for_completion_and_track_needs_a_log() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("true");
        let ctx = executor
            .prepare(&segment, Mode::Analyze, options_for(&segment), dir.path(), dir.path().to_path_buf())
            .unwrap();

        assert_eq!(
            executor.execute(&segment, Mode::Analyze, &ctx).await.unwrap(),
            StepOutcome::NotReady(CompletionState::NotStarted)
        );
        assert!(matches!(
            executor.execute(&segment, Mode::Track, &ctx).await,
            Err(TflowError::Environment { .. })
        ));

        std::fs::write(&ctx.log_file, "Started\nStep1\nDone\n").unwrap();
        assert_eq!(
            executor.execute(&segment, Mode::Track, &ctx).await.unwrap(),
            StepOutcome::Tracked(CompletionState::Complete)
        );
    }

    #[tokio::test]
    async fn rerun_over_interrupted_log_starts_fresh() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("echo Started; echo Step1; echo Done");
        let ctx = executor
            .prepare(&segment, Mode::Run, options_for(&segment), dir.path(), dir.path().to_path_buf())
            .unwrap();
        std::fs::write(&ctx.log_file, "Started\nStep1\n").unwrap();
        assert!(!dir.path().join("Foo.auto.settings").exists());

        assert_eq!(executor.execute(&segment, Mode::Run, &ctx).await.unwrap(), StepOutcome::Ran);
        let log = std::fs::read_to_string(&ctx.log_file).unwrap();
        assert_eq!(log.matches("Started").count(), 1);
        assert!(log.ends_with("Done\n"));
        assert!(dir.path().join("Foo.auto.settings").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rerun_refuses_while_recorded_process_is_alive() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("echo Started; echo Step1; echo Done");
        let ctx = executor
            .prepare(&segment, Mode::Run, options_for(&segment), dir.path(), dir.path().to_path_buf())
            .unwrap();
        std::fs::write(&ctx.log_file, "Started\n").unwrap();
        ctx.pid_file().write(std::process::id()).unwrap();

        let err = executor.execute(&segment, Mode::Run, &ctx).await.unwrap_err();
        assert!(matches!(err, TflowError::Environment { .. }));
        assert_eq!(std::fs::read_to_string(&ctx.log_file).unwrap(), "Started\n");
    }

    #[tokio::test]
    async fn read_always_dispatches() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("true");
        let ctx = executor
            .prepare(&segment, Mode::Read, options_for(&segment), dir.path(), dir.path().to_path_buf())
            .unwrap();
        assert_eq!(
            executor.execute(&segment, Mode::Read, &ctx).await.unwrap(),
            StepOutcome::Read
        );
    }

    #[test]
    fn handoff_injects_input_file() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("true");
        HandoffFile::for_job(dir.path(), "CAP3")
            .publish(&dir.path().join("contigs.fa"))
            .unwrap();

        let mut options = options_for(&segment);
        options.insert(HANDOFF_KEY, "CAP3.auto.result_name");
        let ctx = executor
            .prepare(&segment, Mode::Run, options, dir.path(), dir.path().join("next"))
            .unwrap();
        assert_eq!(
            ctx.options.text(HANDOFF_TARGET),
            Some(dir.path().join("contigs.fa").display().to_string())
        );
        assert_eq!(ctx.log_file, dir.path().join("next").join("Foo.out"));
    }

    #[test]
    fn explicit_input_file_wins_over_handoff() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("true");
        let mut options = options_for(&segment);
        options.insert(HANDOFF_KEY, "missing.auto.result_name");
        options.insert(HANDOFF_TARGET, "given.fa");
        let ctx = executor
            .prepare(&segment, Mode::Run, options, dir.path(), dir.path().to_path_buf())
            .unwrap();
        assert_eq!(ctx.options.text(HANDOFF_TARGET).as_deref(), Some("given.fa"));
    }

    #[test]
    fn missing_handoff_is_fatal_only_for_run() {
        let dir = tempdir().unwrap();
        let config = TflowConfig::default();
        let executor = StepExecutor::new(&config);
        let segment = foo_segment("true");
        let mut options = options_for(&segment);
        options.insert(HANDOFF_KEY, "absent.auto.result_name");

        assert!(
            executor
                .prepare(&segment, Mode::Run, options.clone(), dir.path(), dir.path().to_path_buf())
                .is_err()
        );
        assert!(
            executor
                .prepare(&segment, Mode::Read, options, dir.path(), dir.path().to_path_buf())
                .is_ok()
        );
    }
}
