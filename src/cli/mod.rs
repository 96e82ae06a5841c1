//! Command-line interface of the `linkwatch` binary.

pub mod args;

pub use args::Cli;
