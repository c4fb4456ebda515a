//! # Athletia Runtime Library
//!
//! CLI configuration and log-based presentation for the runtime binary.
//! The main entry point is the `main.rs` binary.

#![warn(missing_docs)]

pub mod cli;
pub mod presenter;

pub use cli::Args;
pub use presenter::{format_last_update, format_supply, render, run_presenter, NEVER_UPDATED};
