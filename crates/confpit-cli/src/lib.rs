//! # confpit-cli
//!
//! Command-line interface for confpit.
//!
//! ## Commands
//!
//! - `confpit watch`: Print every merged view as sources change
//! - `confpit show`: Print the initial merged view and exit

pub mod commands;

pub use commands::Cli;
