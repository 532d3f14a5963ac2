//! Built-in plugins.

pub mod commands;
