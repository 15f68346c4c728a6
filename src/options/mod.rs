//! Option values, the project options file, and the layered resolver.

pub mod file;
pub mod resolver;
pub mod value;

pub use file::{OptionsFile, read_job_type_file};
pub use resolver::{Layer, OptionLayers, ResolvedOptions, Resolution, Resolver, ShadowedSetting};
pub use value::{OptionValue, Options};
