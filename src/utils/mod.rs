//! The `utils` module provides shared definitions used across the `ssehub`
//! service: the error types every layer reports with, and the logging setup.

pub mod error;
pub mod logging;
