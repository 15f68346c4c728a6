//! CLI command implementations.
//!
//! | Module     | Handles                                          |
//! |------------|--------------------------------------------------|
//! | `run`      | every mode, for a single segment or a whole pipe |
//! | `settings` | `print_settings` output (plain and `--json`)     |

pub mod run;
pub mod settings;

pub use run::run;
