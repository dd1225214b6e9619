//! Lesson Generator Library Crate
//!
//! Configuration, prompt loading and service wiring for the `lessons`
//! command-line tool. The binary is a thin wrapper around this library.

pub mod config;
pub mod prompts;
pub mod state;
