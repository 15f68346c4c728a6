//! Layered option resolution.
//!
//! Precedence, lowest to highest:
//! 1. segment default settings
//! 2. process-wide global defaults
//! 3. project options file (global keys, then `segment.key` entries)
//! 4. command-line arguments
//! 5. pipe-step override map
//!
//! Every step gets its own freshly built `ResolvedOptions`.

use std::path::{Path, PathBuf};

use super::file::OptionsFile;
use super::value::{OptionValue, Options};
use crate::errors::ConfigError;

/// Which layer produced a value that replaced a lower-layer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    SegmentDefaults,
    GlobalDefaults,
    OptionsFile,
    ScopedOptionsFile,
    CommandLine,
    PipeStep,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Layer::SegmentDefaults => "segment defaults",
            Layer::GlobalDefaults => "global defaults",
            Layer::OptionsFile => "options file",
            Layer::ScopedOptionsFile => "segment-scoped options file",
            Layer::CommandLine => "command line",
            Layer::PipeStep => "pipe step",
        };
        write!(f, "{}", name)
    }
}

/// A key whose lower-layer value was replaced by a loud layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowedSetting {
    pub key: String,
    pub shadowed: OptionValue,
    pub value: OptionValue,
    pub layer: Layer,
}

/// The shared, step-independent layers (2 to 4).
#[derive(Debug, Clone, Default)]
pub struct OptionLayers {
    pub global_defaults: Options,
    pub options_file: OptionsFile,
    pub command_line: Options,
}

/// Builds one `ResolvedOptions` per step invocation from the shared layers.
pub struct Resolver<'a> {
    layers: &'a OptionLayers,
}

/// Result of one resolution: the options plus every loud override applied.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub options: ResolvedOptions,
    pub shadowed: Vec<ShadowedSetting>,
}

impl<'a> Resolver<'a> {
    pub fn new(layers: &'a OptionLayers) -> Self {
        Self { layers }
    }

    /// Resolve the options for `segment`. `pipe_step` is the override map
    /// of the pipe step being dispatched, if any.
    pub fn resolve(
        &self,
        segment: &str,
        segment_defaults: &Options,
        pipe_step: Option<&Options>,
    ) -> Resolution {
        let mut values = segment_defaults.clone();
        let mut shadowed = Vec::new();

        overlay(&mut values, &self.layers.global_defaults);

        let (file_options, scoped_replaced) = self.layers.options_file.for_segment(segment);
        for (key, previous, value) in scoped_replaced {
            shadowed.push(ShadowedSetting {
                key,
                shadowed: previous,
                value,
                layer: Layer::ScopedOptionsFile,
            });
        }
        overlay(&mut values, &file_options);
        overlay(&mut values, &self.layers.command_line);

        if let Some(step_overrides) = pipe_step {
            for (key, value) in step_overrides {
                if let Some(previous) = values.insert(key.clone(), value.clone()) {
                    shadowed.push(ShadowedSetting {
                        key: key.clone(),
                        shadowed: previous,
                        value: value.clone(),
                        layer: Layer::PipeStep,
                    });
                }
            }
        }

        for entry in &shadowed {
            tracing::warn!(
                "Option \"{}\" with value \"{}\" is being overridden for step \"{}\" by {} value \"{}\"",
                entry.key,
                entry.shadowed,
                segment,
                entry.layer,
                entry.value
            );
        }

        Resolution {
            options: ResolvedOptions::from(values),
            shadowed,
        }
    }
}

fn overlay(target: &mut Options, layer: &Options) {
    for (key, value) in layer {
        target.insert(key.clone(), value.clone());
    }
}

/// Flat key/value options for exactly one step invocation.
///
/// Cloning yields an independent copy; nothing is shared between steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOptions {
    values: Options,
}

impl From<Options> for ResolvedOptions {
    fn from(values: Options) -> Self {
        Self { values }
    }
}

impl ResolvedOptions {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        self.values.remove(key)
    }

    /// Text form of a value; lists are space-joined.
    pub fn text(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.to_string())
    }

    /// A switch such as `overwrite` or `write_pid`. Absent keys are false.
    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(OptionValue::is_truthy)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.values.get(key).map(OptionValue::to_list).unwrap_or_default()
    }

    /// A path-valued option, joined onto `base` when relative.
    pub fn path_under(&self, key: &str, base: &Path) -> Option<PathBuf> {
        let raw = self.values.get(key)?.to_string();
        let path = PathBuf::from(raw);
        Some(if path.is_absolute() {
            path
        } else {
            base.join(path)
        })
    }

    /// Verify every required key is present before any external side effect.
    pub fn require(&self, segment: &str, required: &[String]) -> Result<(), ConfigError> {
        match required.iter().find(|key| !self.values.contains_key(key.as_str())) {
            Some(missing) => Err(ConfigError::MissingRequiredSetting {
                segment: segment.to_string(),
                key: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &Options {
        &self.values
    }
}
