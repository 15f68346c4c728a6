//! Project options file (`options.dat`) parsing.
//!
//! Format: one `key value...` entry per whitespace-separated line. Lines
//! starting with `#` or `!` are comments, and a `#`/`!` token ends the value
//! list of a line. A key of the form `segment.key` is scoped to that segment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::value::{OptionValue, Options};
use crate::errors::{ConfigError, Result, TflowError};

/// Options file names searched in the project directory, in priority order.
pub const OPTIONS_FILE_NAMES: &[&str] = &["options.dat", "job_options.dat", "project_options.dat"];

/// File holding a bare job type name, used when `--job-type` is not given.
pub const JOB_TYPE_FILE: &str = "jobtype.dat";

/// Parsed contents of a project options file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsFile {
    pub path: Option<PathBuf>,
    /// Keys that apply to every segment.
    pub global: Options,
    /// `segment.key` entries, grouped by segment name.
    pub scoped: BTreeMap<String, Options>,
}

impl OptionsFile {
    /// Find and load the first options file present in `project_dir`.
    /// Returns an empty set when none exists.
    pub fn discover(project_dir: &Path) -> Result<Self> {
        for name in OPTIONS_FILE_NAMES {
            let path = project_dir.join(name);
            if path.is_file() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TflowError::io(path, e))?;
        let mut parsed = Self::parse(&content, path)?;
        parsed.path = Some(path.to_path_buf());
        Ok(parsed)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut file = Self::default();

        for (index, line) in content.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some((&key, rest)) = tokens.split_first() else {
                continue;
            };
            if is_comment(key) {
                continue;
            }

            let values: Vec<&str> = rest.iter().copied().take_while(|t| !is_comment(t)).collect();
            let value = match values.as_slice() {
                [] => {
                    return Err(ConfigError::MalformedOptionsLine {
                        path: path.to_path_buf(),
                        line: index + 1,
                        content: line.trim().to_string(),
                    }
                    .into());
                }
                [single] => OptionValue::from_token(single),
                many => OptionValue::list(many.iter().copied()),
            };

            match split_scoped_key(key)? {
                (Some(segment), key) => {
                    file.scoped
                        .entry(segment.to_string())
                        .or_default()
                        .insert(key.to_string(), value);
                }
                (None, key) => {
                    file.global.insert(key.to_string(), value);
                }
            }
        }

        Ok(file)
    }

    /// Options visible to one segment: global keys with that segment's scoped
    /// keys laid on top. Returns the merged set and the global keys the
    /// scoped entries replaced.
    pub fn for_segment(&self, segment: &str) -> (Options, Vec<(String, OptionValue, OptionValue)>) {
        let mut merged = self.global.clone();
        let mut replaced = Vec::new();
        if let Some(scoped) = self.scoped.get(segment) {
            for (key, value) in scoped {
                if let Some(previous) = merged.insert(key.clone(), value.clone())
                    && previous != *value
                {
                    replaced.push((key.clone(), previous, value.clone()));
                }
            }
        }
        (merged, replaced)
    }
}

/// Read the job type named in `jobtype.dat`, if present.
pub fn read_job_type_file(project_dir: &Path) -> Result<Option<String>> {
    let path = project_dir.join(JOB_TYPE_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| TflowError::io(&path, e))?;
    let job_type = content.trim();
    Ok((!job_type.is_empty()).then(|| job_type.to_string()))
}

fn is_comment(token: &str) -> bool {
    token.starts_with('#') || token.starts_with('!')
}

fn split_scoped_key(key: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = key.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(segment), Some(inner), None) => Ok((Some(segment), inner)),
        (Some(_), Some(_), Some(_)) => Err(ConfigError::InvalidOptionKey(key.to_string()).into()),
        _ => Ok((None, key)),
    }
}
