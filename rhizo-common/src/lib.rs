//! # Rhizo Common Library
//!
//! Shared code for the rhizo root-tube tools including:
//! - Error types
//! - Scalar field values as they arrive from extracted tables
//! - Configuration loading

pub mod config;
pub mod error;
pub mod value;

pub use error::{Error, Result};
pub use value::FieldValue;
