//! Static descriptions of segments, and the `[segments.<Name>]` table
//! they can be declared with.

use serde::{Deserialize, Serialize};

use crate::artifacts::log_file_name;
use crate::options::{OptionValue, Options};

/// Failure flags every wrapped tool shares unless it declares its own.
pub const STANDARD_FAILURE_FLAGS: &[&str] = &[
    "Exiting Early...",
    "Traceback",
    "Exception: ERROR",
    "Not Found",
];

/// What the core knows about one external tool type. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    pub name: String,
    /// Expected in the log in this order
    pub milestones: Vec<String>,
    /// Any one of these means done; the final milestone is added implicitly
    pub terminal_flags: Vec<String>,
    /// Any one of these anywhere in the tail means failed
    pub failure_flags: Vec<String>,
    /// Keys that must resolve before anything is spawned
    pub required_settings: Vec<String>,
    pub default_settings: Options,
}

impl SegmentDescriptor {
    /// A descriptor with the standard failure flags and nothing else.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            milestones: Vec::new(),
            terminal_flags: Vec::new(),
            failure_flags: STANDARD_FAILURE_FLAGS.iter().map(|s| s.to_string()).collect(),
            required_settings: Vec::new(),
            default_settings: Options::new(),
        }
    }

    pub fn with_milestones<I, S>(mut self, milestones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.milestones = milestones.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_terminal_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminal_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_failure_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_settings = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.default_settings.insert(key.into(), value.into());
        self
    }

    /// `<name>.out`, used when no `out_file` option is given.
    pub fn default_log_name(&self) -> String {
        log_file_name(&self.name)
    }
}

/// Maps one resolved option onto command-line arguments.
///
/// A true boolean adds the bare flag, false or absent adds nothing, a list
/// adds the flag followed by every item, anything else adds flag and value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentRule {
    pub flag: String,
    pub option: String,
}

impl ArgumentRule {
    pub fn new(flag: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            option: option.into(),
        }
    }
}

/// A `[segments.<Name>]` table in `tflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentDefinition {
    /// Executable and fixed leading arguments
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub milestones: Vec<String>,
    #[serde(default)]
    pub terminal_flags: Vec<String>,
    /// Standard flags when omitted
    #[serde(default)]
    pub failure_flags: Option<Vec<String>>,
    #[serde(default)]
    pub required_settings: Vec<String>,
    #[serde(default)]
    pub defaults: toml::Table,
    #[serde(default)]
    pub arguments: Vec<ArgumentRule>,
    /// Option keys appended as trailing positional arguments
    #[serde(default)]
    pub positional: Vec<String>,
    /// Line appended to the log after a zero exit status
    #[serde(default)]
    pub completion_message: Option<String>,
    /// Output file, relative to the working directory
    #[serde(default)]
    pub result_artifact: Option<String>,
    #[serde(default)]
    pub test_args: Vec<String>,
    #[serde(default)]
    pub program_url: Option<String>,
}

impl SegmentDefinition {
    pub fn descriptor(&self, name: &str) -> SegmentDescriptor {
        let mut descriptor = SegmentDescriptor::new(name)
            .with_milestones(self.milestones.iter().cloned())
            .with_terminal_flags(self.terminal_flags.iter().cloned())
            .with_required(self.required_settings.iter().cloned());
        if let Some(flags) = &self.failure_flags {
            descriptor.failure_flags = flags.clone();
        }
        for (key, value) in &self.defaults {
            match OptionValue::from_toml(value) {
                Some(value) => {
                    descriptor.default_settings.insert(key.clone(), value);
                }
                None => tracing::warn!("Ignoring unsupported default '{}' for segment {}", key, name),
            }
        }
        descriptor
    }
}
