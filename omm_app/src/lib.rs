//! # omm_app
//!
//! Process plumbing for consumer applications: configuration files, logging, Ctrl+C handling
//! and command-line helpers.

pub mod cli;
pub mod config_loader;
pub mod shutdown_handler;
pub mod tracing_setup;
