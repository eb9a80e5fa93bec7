//! Shared types, error model, and configuration for Longform.
//!
//! This crate is the foundation depended on by all other Longform crates.
//! It provides:
//! - [`LongformError`]: the unified error type
//! - Domain types ([`DocumentPlan`], [`SectionContent`], [`Document`], [`ResearchDocument`])
//! - Configuration ([`AppConfig`], [`GenerationOptions`], config loading)
//! - The [`Tool`] capability contract

pub mod config;
pub mod error;
pub mod tool;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CompletionConfig, DefaultsConfig, GenerationOptions, ResearchConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{LongformError, Result};
pub use tool::{Tool, ToolDefinition, ToolSet, required_str};
pub use types::{
    Document, DocumentMetadata, DocumentPlan, DocumentSection, ResearchDepth, ResearchDocument,
    RoleKind, SectionContent, Source, count_words, generate_section_id,
};
