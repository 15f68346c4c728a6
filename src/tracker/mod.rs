//! Log-driven completion tracking.
//!
//! A step has no state of its own beyond its log file. `completion` answers
//! point-in-time questions from a bounded tail window; `progress` follows a
//! live log with a milestone cursor.

pub mod completion;
pub mod progress;
pub mod tail;

pub use completion::{CompletionState, CompletionTracker, FlagRules, Inspection};
pub use progress::{ProgressCursor, TrackEvent, follow};
