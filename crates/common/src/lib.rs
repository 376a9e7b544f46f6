//! Shared error definitions and utilities used across all skskills crates.

pub mod error;

pub use error::{Error, FromMessage, Result, SkskillsError};
