use crate::config::toml_config::SurveyFileConfig;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "noise-survey")]
#[command(about = "Measure ambient noise and keep a located history of readings")]
pub struct CliArgs {
    #[arg(long, global = true, help = "TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, global = true, help = "History file (overrides storage.path)")]
    pub store: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: SurveyCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum SurveyCommand {
    /// Take one measurement with the simulated microphone
    Measure {
        #[arg(long, default_value = "62.0")]
        average_db: f64,

        #[arg(long, help = "Sampling length in seconds")]
        duration: Option<f64>,

        #[arg(long, help = "Simulate a refused microphone permission")]
        deny_microphone: bool,

        #[arg(long, help = "Skip reverse geocoding")]
        no_geocoding: bool,
    },
    /// List recorded measurements, newest first
    History,
    /// Print the history as CSV, or write it to a file
    Export {
        #[arg(long)]
        output: Option<String>,
    },
    /// Show today's quietest reading
    QuietIndex,
    /// Remove a measurement by id
    Delete { id: String },
}

impl CliArgs {
    /// Command-line flags take precedence over the file.
    pub fn apply_overrides(&self, file_config: &mut SurveyFileConfig) {
        if let Some(store) = &self.store {
            file_config.storage.path = Some(store.clone());
        }

        if let SurveyCommand::Measure {
            duration,
            no_geocoding,
            ..
        } = &self.command
        {
            if let Some(duration) = duration {
                file_config.measurement.duration_secs = Some(*duration);
            }
            if *no_geocoding {
                file_config.geocoding.enabled = Some(false);
            }
        }
    }
}
