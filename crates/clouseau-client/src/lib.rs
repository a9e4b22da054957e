//! Clouseau client library - attaches to a terminal session server and keeps
//! the session's command history.
//!
//! Separated from main.rs to enable integration testing.

pub mod app;
pub mod collaborators;
pub mod config;
pub mod files;
pub mod logging;
