//! Input/output: command line, configuration, errors, files, downloads and progress

/// Command-line parsing and command execution
pub mod cli;
/// Constants, defaults and config file loading
pub mod configuration;
/// Error types and helper constructors
pub mod error;
/// Generated image retrieval
pub mod fetch;
/// Markup and image file access
pub mod image;
/// Scoring progress display
pub mod progress;
