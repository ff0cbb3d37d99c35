//! # djlm Common Library
//!
//! Shared code for the DJ library manager crates:
//! - Catalog domain models (tracks, analyses, cue points, duplicate groups)
//! - Event types and the broadcast `EventBus`
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
