//! CLI subcommands

mod config;
mod run;

pub use config::ConfigCommand;
pub use run::RunArgs;
