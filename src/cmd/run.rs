//! Mode dispatch for a single segment or a whole pipe.

use anyhow::{Context, Result};
use std::path::Path;

use tflow::errors::ConfigError;
use tflow::options::{OptionValue, Options};

use super::super::Cli;
use super::settings::print_settings;

pub async fn run(cli: &Cli) -> Result<()> {
    use tflow::config::TflowConfig;
    use tflow::executor::{Mode, StepExecutor};
    use tflow::options::{OptionLayers, OptionsFile, Resolver, read_job_type_file};
    use tflow::pipeline::{PipelineSequencer, pipes_from_config};
    use tflow::segment::SegmentRegistry;

    let current_dir = std::env::current_dir().context("Failed to get current directory")?;
    // Children run in their own working directories, so paths stay absolute.
    let project_dir = match &cli.project_dir {
        Some(dir) => current_dir.join(dir),
        None => current_dir,
    };
    load_env_file(&project_dir)?;

    let mode: Mode = cli.mode.parse()?;
    let config = TflowConfig::resolve(&project_dir, cli.config.as_deref())?;
    let registry = SegmentRegistry::from_config(&config);
    for warning in config.validate(&registry.names()) {
        tracing::warn!("{}", warning);
    }

    let job_type = match &cli.job_type {
        Some(job_type) => job_type.clone(),
        None => read_job_type_file(&project_dir)?.ok_or(ConfigError::JobTypeNotSpecified)?,
    };

    let layers = OptionLayers {
        global_defaults: config.global_defaults(),
        options_file: OptionsFile::discover(&project_dir)?,
        command_line: command_line_options(cli)?,
    };
    if let Some(path) = &layers.options_file.path {
        tracing::debug!("Using options file {}", path.display());
    }

    let executor = StepExecutor::new(&config);
    let pipes = pipes_from_config(&config);

    if let Some(pipe) = pipes.get(&job_type) {
        if mode == Mode::PrintSettings {
            let options = PipelineSequencer::pipe_options(pipe, &layers, &project_dir);
            return print_settings(&options, cli.json);
        }
        PipelineSequencer::new(&registry, &executor)
            .run(pipe, mode, &layers, &project_dir)
            .await?;
        return Ok(());
    }

    let segment = registry.get(&job_type)?;
    let options = Resolver::new(&layers)
        .resolve(&job_type, &segment.descriptor().default_settings, None)
        .options;
    let working_dir = StepExecutor::working_dir_for(&options, &project_dir);
    let ctx = executor.prepare(segment.as_ref(), mode, options, &project_dir, working_dir)?;

    if mode == Mode::PrintSettings {
        return print_settings(&ctx.options, cli.json);
    }
    executor.execute(segment.as_ref(), mode, &ctx).await?;
    Ok(())
}

fn load_env_file(project_dir: &Path) -> Result<()> {
    let env_file = project_dir.join(".env");
    if env_file.is_file() {
        dotenvy::from_path(&env_file)
            .with_context(|| format!("Failed to load {}", env_file.display()))?;
    }
    Ok(())
}

/// Resolver layer 4: only the arguments actually given.
pub fn command_line_options(cli: &Cli) -> Result<Options> {
    let mut options = Options::new();
    if cli.verbose {
        options.insert("verbose".into(), OptionValue::Bool(true));
    }
    if cli.confirm {
        options.insert("confirm".into(), OptionValue::Bool(true));
    }
    let flags = [
        ("overwrite", cli.overwrite),
        ("is_paired_reads", cli.is_paired_reads),
        ("print_test_output", cli.print_test_output),
    ];
    for (key, value) in flags {
        if let Some(value) = value {
            options.insert(key.into(), OptionValue::Bool(value));
        }
    }
    let texts = [
        ("out_file", &cli.out_file),
        ("read_type", &cli.read_type),
        ("label", &cli.label),
        ("max_CPU", &cli.max_cpu),
    ];
    for (key, value) in texts {
        if let Some(value) = value {
            options.insert(key.into(), OptionValue::text(value.clone()));
        }
    }
    for entry in &cli.set {
        let (key, value) = parse_set(entry)?;
        options.insert(key, value);
    }
    Ok(options)
}

/// `KEY=VALUE`; a value with whitespace becomes a list, as in the options file.
fn parse_set(entry: &str) -> Result<(String, OptionValue), ConfigError> {
    let Some((key, value)) = entry.split_once('=') else {
        return Err(ConfigError::InvalidOptionValue {
            key: entry.to_string(),
            value: String::new(),
            reason: "expected KEY=VALUE".into(),
        });
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidOptionValue {
            key: entry.to_string(),
            value: value.to_string(),
            reason: "empty key".into(),
        });
    }
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let value = match tokens.as_slice() {
        [] => OptionValue::text(""),
        [single] => OptionValue::from_token(single),
        many => OptionValue::list(many.iter().copied()),
    };
    Ok((key.to_string(), value))
}
