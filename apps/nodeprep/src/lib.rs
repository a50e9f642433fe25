//! # nodeprep
//!
//! Library half of the nodeprep binary: CLI, project descriptor, and the
//! container runtime. `main.rs` only sets up logging and calls
//! [`cli::execute`].

pub mod cli;
pub mod config;
pub mod runtime;
