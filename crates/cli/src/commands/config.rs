//! Config command - inspect the effective engine configuration

use anyhow::Context;
use clap::Subcommand;
use processor::config::EngineConfig;
use std::path::Path;

/// Config command variants
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print the effective configuration (file, environment and defaults merged)
    #[command(name = "show")]
    Show,

    /// Validate the configuration and list the metric definitions
    #[command(name = "validate")]
    Validate,
}

impl ConfigCommand {
    pub fn execute(&self, path: Option<&Path>) -> anyhow::Result<()> {
        let config = EngineConfig::load(path).context("invalid engine configuration")?;

        match self {
            ConfigCommand::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigCommand::Validate => {
                println!("Configuration is valid");
                println!("  worker:     {}", config.worker_id);
                println!(
                    "  watermark:  {} ms out-of-orderness",
                    config.watermark.max_out_of_orderness_ms
                );
                println!("  checkpoint: {}", config.checkpoint.directory.display());
                for definition in &config.metrics {
                    println!(
                        "  metric {:<28} {:?} by {:?}, {}",
                        definition.name, definition.window, definition.key_by, definition.aggregate
                    );
                }
            }
        }
        Ok(())
    }
}
