//! Configuration management for Ember.
//!
//! Supports configuration from:
//! - Builder-style setters (highest priority)
//! - Environment variables
//! - A host application's config file via `serde`
//! - Built-in defaults (lowest priority)

mod settings;

pub use settings::{
    EmbedderConfig, DEFAULT_BASE_URL, DEFAULT_MAX_LENGTH, DEFAULT_MODEL_ID, DEFAULT_REVISION,
};
