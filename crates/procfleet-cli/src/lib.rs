//! Library side of the `procfleet` binary: argument parsing and command
//! handlers. Supervision and registry logic live in the library crates.

pub mod handlers;
pub mod parser;

pub use parser::{Cli, Commands, LogSinkArgs};
