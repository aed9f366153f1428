//! agentsandbox - filesystem sandbox for commands run by AI agents
//!
//! This crate provides:
//! - Policy resolution: allow-write and deny-read paths, deny always wins
//! - Native backends: bubblewrap (Linux) and Seatbelt (macOS)
//! - An execution engine with combined output, exit codes and cancellation
//! - Policy file loading and the `agentsandbox` CLI

#[cfg(not(unix))]
compile_error!("agentsandbox supports only Unix hosts (Linux and macOS)");

pub mod cli;
pub mod config;
pub mod paths;
pub mod sandbox;

pub use sandbox::{BackendKind, RunResult, Sandbox, SandboxConfig, SandboxError};
