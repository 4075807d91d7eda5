//! # TrialScope Common Library
//!
//! Shared code for the TrialScope crates including:
//! - Error types
//! - Configuration loading (ENV -> TOML -> compiled defaults)
//! - Search progress events and the broadcast EventBus
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
