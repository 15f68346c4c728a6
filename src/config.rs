//! Process-wide configuration read from `tflow.toml`.
//!
//! Built once at startup and passed by reference into the resolver, the
//! executor and the sequencer. Nothing here is global.
//!
//! # Configuration File Format
//!
//! ```toml
//! [tracking]
//! tail_length = 15
//! poll_interval_secs = 5
//!
//! [process]
//! kill_settle_millis = 200
//! kill_retry_millis = 1000
//!
//! [defaults]
//! max_CPU = "8"
//! write_pid = true
//!
//! [executables]
//! cap3 = "/opt/cap3/bin/cap3"
//!
//! [segments.Assemble]
//! command = ["assembler", "--fast"]
//! milestones = ["Loading", "Assembling", "Assembly Done"]
//! required_settings = ["input_file"]
//!
//! [pipes.Assemble_Pipe]
//! steps = [
//!     { segment = "Assemble", options = { working_directory = "asm" } },
//!     { segment = "Summary" },
//! ]
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::options::{OptionValue, Options};
use crate::pipeline::PipeDefinition;
use crate::segment::SegmentDefinition;

/// File name looked up in the project directory and the user config dir.
pub const CONFIG_FILE_NAME: &str = "tflow.toml";

/// Version string recorded in every settings snapshot.
pub const TFLOW_VERSION: &str = "0.9";

/// Log tailing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Lines read from the end of a log for a point-in-time check
    #[serde(default = "default_tail_length")]
    pub tail_length: usize,
    /// Seconds slept between polls while tracking
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tail_length: default_tail_length(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_tail_length() -> usize {
    15
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Termination timing used by `stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Wait after the first kill signal before checking liveness
    #[serde(default = "default_kill_settle_millis")]
    pub kill_settle_millis: u64,
    /// Wait between repeated kill signals
    #[serde(default = "default_kill_retry_millis")]
    pub kill_retry_millis: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            kill_settle_millis: default_kill_settle_millis(),
            kill_retry_millis: default_kill_retry_millis(),
        }
    }
}

fn default_kill_settle_millis() -> u64 {
    200
}

fn default_kill_retry_millis() -> u64 {
    1000
}

/// Root of `tflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TflowConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    /// Extra global defaults, laid over the built-in ones
    #[serde(default)]
    pub defaults: toml::Table,
    /// Tool name to executable path
    #[serde(default)]
    pub executables: BTreeMap<String, String>,
    #[serde(default)]
    pub segments: BTreeMap<String, SegmentDefinition>,
    #[serde(default)]
    pub pipes: BTreeMap<String, PipeDefinition>,
    /// Where this configuration was read from, if anywhere
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl TflowConfig {
    /// Load configuration from a specific file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Invalid tflow.toml")
    }

    /// Candidate config files for a project, highest priority first.
    pub fn candidates(project_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![project_dir.join(CONFIG_FILE_NAME)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tflow").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Load the first config file found for `project_dir`, or defaults.
    pub fn load_or_default(project_dir: &Path) -> anyhow::Result<Self> {
        for path in Self::candidates(project_dir) {
            if path.is_file() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load `explicit` when given, otherwise discover.
    pub fn resolve(project_dir: &Path, explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::load_or_default(project_dir),
        }
    }

    /// Resolver layer 2: built-in global defaults with `[defaults]` on top.
    pub fn global_defaults(&self) -> Options {
        let mut defaults = builtin_global_defaults();
        for (key, value) in &self.defaults {
            match OptionValue::from_toml(value) {
                Some(value) => {
                    defaults.insert(key.clone(), value);
                }
                None => tracing::warn!("Ignoring unsupported value for default '{}'", key),
            }
        }
        defaults
    }

    /// Executable for `tool`. `TFLOW_<TOOL>_EXEC` wins over `[executables]`,
    /// which wins over `fallback`.
    pub fn executable(&self, tool: &str, fallback: &str) -> String {
        let var = format!("TFLOW_{}_EXEC", tool.to_uppercase());
        if let Ok(value) = std::env::var(&var)
            && !value.is_empty()
        {
            return value;
        }
        self.executables
            .get(tool)
            .or_else(|| self.executables.get(&tool.to_lowercase()))
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Human-readable problems that do not prevent loading.
    pub fn validate(&self, known_segments: &[String]) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.tracking.tail_length == 0 {
            warnings.push(
                "tracking.tail_length is 0; point-in-time checks will never see a flag".to_string(),
            );
        }
        if self.tracking.poll_interval_secs == 0 {
            warnings.push("tracking.poll_interval_secs is 0; tracking will busy-poll".to_string());
        }

        for (name, definition) in &self.segments {
            if definition.command.is_empty() {
                warnings.push(format!("segments.{} has an empty command", name));
            }
        }

        for (pipe, definition) in &self.pipes {
            if definition.steps.is_empty() {
                warnings.push(format!("pipes.{} has no steps", pipe));
            }
            for step in &definition.steps {
                let known = known_segments.iter().any(|s| s == &step.segment)
                    || self.segments.contains_key(&step.segment);
                if !known {
                    warnings.push(format!(
                        "pipes.{} names unknown segment '{}'",
                        pipe, step.segment
                    ));
                }
            }
        }

        warnings
    }
}

/// Defaults every step sees unless a higher layer replaces them.
pub fn builtin_global_defaults() -> Options {
    let mut defaults = Options::new();
    for key in [
        "write_analysis",
        "write_settings",
        "write_command",
        "write_times",
        "write_report",
        "write_pid",
    ] {
        defaults.insert(key.to_string(), OptionValue::Bool(true));
    }
    for key in [
        "is_pipe",
        "verbose",
        "overwrite",
        "confirm",
        "print_test_output",
    ] {
        defaults.insert(key.to_string(), OptionValue::Bool(false));
    }
    defaults.insert("TFLOW_Version".to_string(), OptionValue::text(TFLOW_VERSION));
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_config_uses_defaults() {
        let config = TflowConfig::parse("").unwrap();
        assert_eq!(config.tracking.tail_length, 15);
        assert_eq!(config.tracking.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.process.kill_settle_millis, 200);
        assert_eq!(config.process.kill_retry_millis, 1000);
        assert!(config.segments.is_empty());
        assert!(config.pipes.is_empty());
    }

    #[test]
    fn parses_sections() {
        let config = TflowConfig::parse(
            r#"
[tracking]
tail_length = 40

[defaults]
max_CPU = 8
write_pid = false

[segments.Foo]
command = ["sh", "foo.sh"]
milestones = ["Started", "Step1", "Done"]
failure_flags = ["Traceback"]

[pipes.Foo_Pipe]
steps = [{ segment = "Foo", options = { label = "liver" } }]
"#,
        )
        .unwrap();

        assert_eq!(config.tracking.tail_length, 40);
        assert_eq!(config.tracking.poll_interval_secs, 5);
        assert_eq!(config.segments["Foo"].milestones.len(), 3);
        assert_eq!(config.pipes["Foo_Pipe"].steps[0].segment, "Foo");

        let defaults = config.global_defaults();
        assert_eq!(defaults.get("max_CPU"), Some(&OptionValue::text("8")));
        assert_eq!(defaults.get("write_pid"), Some(&OptionValue::Bool(false)));
        assert_eq!(defaults.get("write_report"), Some(&OptionValue::Bool(true)));
    }

    #[test]
    fn builtin_defaults_cover_switches() {
        let defaults = builtin_global_defaults();
        assert_eq!(defaults.get("overwrite"), Some(&OptionValue::Bool(false)));
        assert_eq!(defaults.get("write_settings"), Some(&OptionValue::Bool(true)));
        assert_eq!(
            defaults.get("TFLOW_Version"),
            Some(&OptionValue::text(TFLOW_VERSION))
        );
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(TflowConfig::parse("[tracking\ntail_length = ").is_err());
    }

    #[test]
    fn load_or_default_reads_project_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[tracking]\npoll_interval_secs = 1\n",
        )
        .unwrap();
        let config = TflowConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.tracking.poll_interval_secs, 1);
        assert_eq!(config.source, Some(dir.path().join(CONFIG_FILE_NAME)));
    }

    #[test]
    fn executables_table_and_fallback() {
        let config = TflowConfig::parse("[executables]\ncap3 = \"/opt/cap3\"\n").unwrap();
        assert_eq!(config.executable("cap3", "cap3"), "/opt/cap3");
        assert_eq!(
            config.executable("tflow_test_no_such_tool", "fallback"),
            "fallback"
        );
    }

    #[test]
    fn validate_flags_unknown_pipe_segments() {
        let config = TflowConfig::parse(
            "[tracking]\ntail_length = 0\n\n[pipes.P]\nsteps = [{ segment = \"Nope\" }]\n",
        )
        .unwrap();
        let warnings = config.validate(&["CAP3".to_string()]);
        assert!(warnings.iter().any(|w| w.contains("tail_length")));
        assert!(warnings.iter().any(|w| w.contains("unknown segment 'Nope'")));
    }
}
