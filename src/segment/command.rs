//! Generic wrapper for an external command-line tool.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::descriptor::{ArgumentRule, SegmentDefinition, SegmentDescriptor};
use super::{Segment, StepContext};
use crate::artifacts::{AutoFile, HandoffFile, report_file_name};
use crate::config::TflowConfig;
use crate::errors::{ConfigError, Result, TflowError};
use crate::options::{OptionValue, ResolvedOptions};
use crate::process::{Launch, ToolProbe};
use crate::report::{Report, ReportKind, write_report};

/// How a `CommandSegment` turns options into a command line, and what it
/// does around the process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub arguments: Vec<ArgumentRule>,
    /// Option keys appended after the flags, in order
    pub positional: Vec<String>,
    /// Appended to the log after a zero exit status
    pub completion_message: Option<String>,
    /// Output file relative to the working directory. `{key}` is replaced
    /// by the text of that option.
    pub result_artifact: Option<String>,
    pub test_args: Vec<String>,
    pub program_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandSegment {
    descriptor: SegmentDescriptor,
    spec: CommandSpec,
}

impl CommandSegment {
    pub fn new(descriptor: SegmentDescriptor, spec: CommandSpec) -> Self {
        Self { descriptor, spec }
    }

    /// Build from a `[segments.<Name>]` table. The first command word is
    /// looked up through `[executables]` and `TFLOW_<NAME>_EXEC`.
    pub fn from_definition(name: &str, definition: &SegmentDefinition, config: &TflowConfig) -> Self {
        let mut descriptor = definition.descriptor(name);

        if let Some((program, rest)) = definition.command.split_first() {
            let mut command_list = vec![config.executable(name, program)];
            command_list.extend(rest.iter().cloned());
            descriptor
                .default_settings
                .entry("command_list".to_string())
                .or_insert(OptionValue::List(command_list));
        }
        if !descriptor.required_settings.iter().any(|k| k == "command_list") {
            descriptor.required_settings.push("command_list".to_string());
        }

        let spec = CommandSpec {
            arguments: definition.arguments.clone(),
            positional: definition.positional.clone(),
            completion_message: definition.completion_message.clone(),
            result_artifact: definition.result_artifact.clone(),
            test_args: definition.test_args.clone(),
            program_url: definition.program_url.clone(),
        };
        Self::new(descriptor, spec)
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Arguments derived from options, after the fixed command words.
    pub fn build_arguments(&self, options: &ResolvedOptions) -> Vec<String> {
        let mut args = Vec::new();
        for rule in &self.spec.arguments {
            match options.get(&rule.option) {
                None | Some(OptionValue::Bool(false)) => {}
                Some(OptionValue::Bool(true)) => push_flag(&mut args, &rule.flag),
                Some(OptionValue::List(items)) => {
                    push_flag(&mut args, &rule.flag);
                    args.extend(items.iter().cloned());
                }
                Some(OptionValue::Text(value)) => {
                    push_flag(&mut args, &rule.flag);
                    args.push(value.clone());
                }
            }
        }
        for key in &self.spec.positional {
            if let Some(value) = options.get(key) {
                args.extend(value.to_list());
            }
        }
        args
    }

    pub fn launch(&self, ctx: &StepContext) -> Result<Launch> {
        let command_list = ctx.options.list("command_list");
        let Some((program, fixed)) = command_list.split_first() else {
            return Err(ConfigError::MissingRequiredSetting {
                segment: self.descriptor.name.clone(),
                key: "command_list".to_string(),
            }
            .into());
        };

        let mut args = fixed.to_vec();
        args.extend(self.build_arguments(&ctx.options));

        Ok(Launch {
            segment: self.descriptor.name.clone(),
            program: program.clone(),
            args,
            working_dir: ctx.working_dir.clone(),
            log_file: ctx.log_file.clone(),
            pid_file: ctx.options.flag("write_pid").then(|| ctx.pid_file()),
        })
    }

    /// The declared result file for this invocation, if any.
    pub fn result_path(&self, ctx: &StepContext) -> Option<PathBuf> {
        let template = self.spec.result_artifact.as_ref()?;
        Some(ctx.working_dir.join(expand_template(template, &ctx.options)))
    }

    fn write_command_script(&self, ctx: &StepContext, launch: &Launch) -> Result<()> {
        let path = ctx.auto_file(AutoFile::Command);
        let script = format!(
            "#!/bin/sh\ncd {}\n{}\n",
            launch.working_dir.display(),
            launch.command_line()
        );
        std::fs::write(&path, script).map_err(|e| TflowError::io(&path, e))
    }
}

/// Replace each `{key}` with the option's text. Unknown keys are left as is.
fn expand_template(template: &str, options: &ResolvedOptions) -> String {
    let mut out = template.to_string();
    for (key, value) in options.iter() {
        let placeholder = format!("{{{}}}", key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &value.to_string());
        }
    }
    out
}

fn push_flag(args: &mut Vec<String>, flag: &str) {
    if !flag.is_empty() {
        args.push(flag.to_string());
    }
}

fn append_to_log(log_file: &Path, lines: &[String]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| TflowError::io(log_file, e))?;
    for line in lines {
        writeln!(file, "{}", line).map_err(|e| TflowError::io(log_file, e))?;
    }
    Ok(())
}

#[async_trait]
impl Segment for CommandSegment {
    fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let launch = self.launch(ctx)?;
        if ctx.options.flag("write_command") {
            self.write_command_script(ctx, &launch)?;
        }
        tracing::info!("Running command: {}", launch.command_line());

        let status = ctx.process.run(&launch).await?;
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            append_to_log(
                &ctx.log_file,
                &[
                    format!("{} exited with status {}", self.descriptor.name, code),
                    "Exiting Early...".to_string(),
                ],
            )?;
            return Err(TflowError::ToolExited {
                segment: self.descriptor.name.clone(),
                code,
            });
        }

        if let Some(message) = &self.spec.completion_message {
            append_to_log(&ctx.log_file, std::slice::from_ref(message))?;
        }

        if ctx.options.flag("write_result_name")
            && let Some(artifact) = self.result_path(ctx)
        {
            HandoffFile::for_job(&ctx.working_dir, &ctx.job_type).publish(&artifact)?;
        }
        Ok(())
    }

    async fn analyze(&self, ctx: &StepContext) -> Result<Option<String>> {
        let Some(path) = self.result_path(ctx) else {
            println!("    No analysis implemented for {}.", self.descriptor.name);
            return Ok(None);
        };

        let Ok(metadata) = std::fs::metadata(&path) else {
            tracing::warn!(
                "Result file {} for {} not found, nothing to analyze",
                path.display(),
                self.descriptor.name
            );
            return Ok(None);
        };

        let artifact = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let report = Report::new(ReportKind::Unknown)
            .with("artifact", artifact)
            .with("bytes", metadata.len().to_string());
        if ctx.options.flag("write_report") {
            write_report(
                &ctx.working_dir.join(report_file_name(&ctx.job_type)),
                &report,
                &[],
            )?;
        }
        Ok(Some(format!(
            "{} result {}: {} bytes\n",
            self.descriptor.name,
            path.display(),
            metadata.len()
        )))
    }

    async fn test(&self, ctx: &StepContext, silent: bool) -> Result<ToolProbe> {
        let command_list = ctx.options.list("command_list");
        let Some((program, fixed)) = command_list.split_first() else {
            return Err(ConfigError::MissingRequiredSetting {
                segment: self.descriptor.name.clone(),
                key: "command_list".to_string(),
            }
            .into());
        };
        let mut args = fixed.to_vec();
        args.extend(self.spec.test_args.iter().cloned());

        let probe = ctx.process.probe(program, &args).await;
        match &probe {
            ToolProbe::Found { output } if !silent => print!("{}", output),
            ToolProbe::Unavailable { .. } => {
                println!(
                    "{} cannot be found with shell command: \"{}\"",
                    self.descriptor.name,
                    command_list.join(" ")
                );
                if let Some(url) = &self.spec.program_url {
                    println!(
                        "If not installed, {} can be downloaded from:\n{}",
                        self.descriptor.name, url
                    );
                }
            }
            ToolProbe::Found { .. } => {}
        }
        Ok(probe)
    }
}
