//! # Starline Common Library
//!
//! Shared code for the Starline interview-practice services:
//! - Database initialization, migrations and persisted models
//! - Pipeline event types (PipelineEvent enum) and EventBus
//! - Configuration loading (CLI → ENV → TOML → compiled defaults)
//! - SSE helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
