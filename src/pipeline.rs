//! Pipe descriptors and the sequencer that walks them.
//!
//! A pipe is an ordered list of `(segment, overrides)` steps. Steps run one
//! after another; the first error aborts the rest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifacts::{AutoFile, TimingRecord, write_settings_snapshot};
use crate::config::TflowConfig;
use crate::errors::Result;
use crate::executor::{Mode, StepExecutor, StepOutcome};
use crate::options::{OptionLayers, OptionValue, Options, ResolvedOptions, Resolver};
use crate::segment::{Segment, SegmentRegistry};

/// `[pipes.<Name>]` in `tflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipeDefinition {
    #[serde(default)]
    pub steps: Vec<PipeStepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeStepDefinition {
    pub segment: String,
    #[serde(default)]
    pub options: toml::Table,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeStep {
    pub segment: String,
    pub overrides: Options,
}

impl PipeStep {
    pub fn new(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            overrides: Options::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// Read-only at run time; step order is execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeDescriptor {
    pub name: String,
    pub steps: Vec<PipeStep>,
}

impl PipeDescriptor {
    pub fn from_definition(name: &str, definition: &PipeDefinition) -> Self {
        let steps = definition
            .steps
            .iter()
            .map(|step| PipeStep {
                segment: step.segment.clone(),
                overrides: step
                    .options
                    .iter()
                    .filter_map(|(key, value)| match OptionValue::from_toml(value) {
                        Some(value) => Some((key.clone(), value)),
                        None => {
                            tracing::warn!(
                                "Ignoring option {} of pipe {} step {}: unsupported value",
                                key,
                                name,
                                step.segment
                            );
                            None
                        }
                    })
                    .collect(),
            })
            .collect();
        Self {
            name: name.to_string(),
            steps,
        }
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.segment.clone()).collect()
    }
}

/// Pipes that ship with tflow.
pub fn builtin_pipes() -> Vec<PipeDescriptor> {
    vec![
        PipeDescriptor {
            name: "CAP3_Pipe".into(),
            steps: vec![
                PipeStep::new("CAP3")
                    .with("working_directory", "")
                    .with("write_result_name", true),
                PipeStep::new("Summary"),
            ],
        },
        PipeDescriptor {
            name: "Assembly_Pipe".into(),
            steps: vec![
                PipeStep::new("Trimmomatic"),
                PipeStep::new("Trinity")
                    .with("working_directory", "")
                    .with("write_result_name", true),
                PipeStep::new("CAP3")
                    .with("working_directory", "CAP3")
                    .with("result_name_file", "Trinity.auto.result_name"),
                PipeStep::new("Summary"),
            ],
        },
        PipeDescriptor {
            name: "Test_Pipe".into(),
            steps: ["Trimmomatic", "Trinity", "CAP3", "Summary"]
                .into_iter()
                .map(PipeStep::new)
                .collect(),
        },
    ]
}

/// Built-in pipes plus `[pipes.<Name>]` from the config, by name.
pub fn pipes_from_config(config: &TflowConfig) -> BTreeMap<String, PipeDescriptor> {
    let mut pipes: BTreeMap<String, PipeDescriptor> = builtin_pipes()
        .into_iter()
        .map(|pipe| (pipe.name.clone(), pipe))
        .collect();
    for (name, definition) in &config.pipes {
        pipes.insert(name.clone(), PipeDescriptor::from_definition(name, definition));
    }
    pipes
}

/// One step, resolved and ready to dispatch.
pub struct PlannedStep {
    pub segment: Arc<dyn Segment>,
    pub options: ResolvedOptions,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeRun {
    pub pipe: String,
    pub outcomes: Vec<(String, StepOutcome)>,
}

pub struct PipelineSequencer<'a> {
    registry: &'a SegmentRegistry,
    executor: &'a StepExecutor<'a>,
}

impl<'a> PipelineSequencer<'a> {
    pub fn new(registry: &'a SegmentRegistry, executor: &'a StepExecutor<'a>) -> Self {
        Self { registry, executor }
    }

    /// Shared layers for every step of `pipe`: the caller's layers with
    /// `is_pipe` and `pipe_steps` added to the command-line layer.
    pub fn pipe_layers(pipe: &PipeDescriptor, layers: &OptionLayers) -> OptionLayers {
        let mut layers = layers.clone();
        layers.command_line.insert("is_pipe".into(), OptionValue::Bool(true));
        layers
            .command_line
            .insert("pipe_steps".into(), OptionValue::List(pipe.step_names()));
        layers
    }

    /// Options at pipe scope, with no segment defaults and no step overrides.
    pub fn pipe_options(pipe: &PipeDescriptor, layers: &OptionLayers, project_dir: &Path) -> ResolvedOptions {
        let layers = Self::pipe_layers(pipe, layers);
        let mut options = Resolver::new(&layers)
            .resolve(&pipe.name, &Options::new(), None)
            .options;
        options.insert("job_type", pipe.name.clone());
        options.insert("project_directory", project_dir.display().to_string());
        options
    }

    /// Resolve every step up front. Unknown segments fail here; so do
    /// missing required settings when `mode` is `run`.
    pub fn plan(
        &self,
        pipe: &PipeDescriptor,
        mode: Mode,
        layers: &OptionLayers,
        project_dir: &Path,
    ) -> Result<Vec<PlannedStep>> {
        let layers = Self::pipe_layers(pipe, layers);
        let resolver = Resolver::new(&layers);

        let mut planned = Vec::with_capacity(pipe.steps.len());
        for step in &pipe.steps {
            let segment = self.registry.get(&step.segment)?;
            let options = resolver
                .resolve(
                    &step.segment,
                    &segment.descriptor().default_settings,
                    Some(&step.overrides),
                )
                .options;
            if mode == Mode::Run {
                StepExecutor::verify_required(segment.as_ref(), &options)?;
            }
            let working_dir = match step.overrides.get("working_directory") {
                Some(dir) => {
                    let dir = dir.to_string();
                    if dir.is_empty() {
                        project_dir.to_path_buf()
                    } else {
                        project_dir.join(dir)
                    }
                }
                None => project_dir.to_path_buf(),
            };
            planned.push(PlannedStep {
                segment,
                options,
                working_dir,
            });
        }
        Ok(planned)
    }

    /// Dispatch `mode` to every step in order, stopping at the first error.
    pub async fn run(
        &self,
        pipe: &PipeDescriptor,
        mode: Mode,
        layers: &OptionLayers,
        project_dir: &Path,
    ) -> Result<PipeRun> {
        let planned = self.plan(pipe, mode, layers, project_dir)?;
        let total = planned.len();

        let pipe_options = Self::pipe_options(pipe, layers, project_dir);
        let mut timing = None;
        if mode == Mode::Run && pipe_options.flag("write_times") {
            timing = Some(TimingRecord::start(AutoFile::Timing.path(project_dir, &pipe.name))?);
        }

        tracing::info!("{} {} with {} steps", mode.gerund(), pipe.name, total);
        let mut outcomes = Vec::with_capacity(total);
        for (index, step) in planned.into_iter().enumerate() {
            println!(
                "\n{} {} step {}/{}: {}",
                console::style(mode.gerund()).bold().cyan(),
                pipe.name,
                index + 1,
                total,
                console::style(step.segment.name()).bold()
            );
            let ctx = self
                .executor
                .prepare(step.segment.as_ref(), mode, step.options, project_dir, step.working_dir)?;
            let outcome = self.executor.execute(step.segment.as_ref(), mode, &ctx).await?;
            outcomes.push((step.segment.name().to_string(), outcome));
        }

        if let Some(timing) = timing {
            timing.finish()?;
        }
        if mode == Mode::Run {
            if pipe_options.flag("write_settings") {
                write_settings_snapshot(&AutoFile::Settings.path(project_dir, &pipe.name), &pipe_options)?;
            }
            println!("\n{}", console::style("All Jobs Complete.").green().bold());
        }

        Ok(PipeRun {
            pipe: pipe.name.clone(),
            outcomes,
        })
    }
}
