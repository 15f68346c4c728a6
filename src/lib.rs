pub mod artifacts;
pub mod config;
pub mod errors;
pub mod executor;
pub mod options;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod segment;
pub mod tracker;
