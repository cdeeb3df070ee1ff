//! gpuhealth daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `gpuhealthd` is used as a binary (main.rs).

pub mod cli;
pub mod commands;
pub mod logging;
pub mod matcher;
pub mod orchestrator;
