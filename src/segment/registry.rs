//! Segment lookup by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Segment;
use super::builtin::builtin_segments;
use super::command::CommandSegment;
use crate::config::TflowConfig;
use crate::errors::{ConfigError, Result};

#[derive(Clone, Default)]
pub struct SegmentRegistry {
    segments: BTreeMap<String, Arc<dyn Segment>>,
}

impl std::fmt::Debug for SegmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRegistry")
            .field("segments", &self.names())
            .finish()
    }
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in segments plus every `[segments.<Name>]` from the config.
    /// A configured segment replaces a built-in of the same name.
    pub fn from_config(config: &TflowConfig) -> Self {
        let mut registry = Self::new();
        for segment in builtin_segments(config) {
            registry.register(segment);
        }
        for (name, definition) in &config.segments {
            if registry.contains(name) {
                tracing::info!("Segment {} from config replaces the built-in", name);
            }
            registry.register(Arc::new(CommandSegment::from_definition(name, definition, config)));
        }
        registry
    }

    pub fn register(&mut self, segment: Arc<dyn Segment>) {
        self.segments.insert(segment.name().to_string(), segment);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Segment>> {
        self.segments
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownJobType(name.to_string()).into())
    }

    pub fn names(&self) -> Vec<String> {
        self.segments.keys().cloned().collect()
    }
}
