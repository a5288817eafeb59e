//! Sluice Core
//!
//! Core domain types, traits, and error handling for the sluice
//! orchestration core. This crate has minimal dependencies and defines
//! the shared vocabulary used across all other crates.

pub mod context;
pub mod definition;
pub mod error;
pub mod ids;
pub mod ports;
pub mod report;
pub mod run;

pub use error::{Error, Result};
pub use ids::*;
