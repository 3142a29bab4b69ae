//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::AgentMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Estate Concierge - conversational real-estate assistant
///
/// Serves a chat API that answers property questions with text-to-SQL,
/// semantic search, investment heuristics and viewing bookings.
///
/// Examples:
///   concierge seed data/properties.csv
///   concierge ingest
///   concierge serve --port 8000 --mode tools
///   concierge ask "2 bedroom apartments in Dubai under 1m"
///   concierge init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .concierge.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, value_name = "FILE", env = "CONCIERGE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP chat API
    Serve(ServeArgs),

    /// Import projects from a CSV file
    Seed(SeedArgs),

    /// Build the semantic search index from the projects table
    Ingest(IngestArgs),

    /// Ask the concierge one question and print the answer
    Ask(AskArgs),

    /// Generate a default .concierge.toml configuration file
    InitConfig,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "CONCIERGE_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CONCIERGE_PORT")]
    pub port: Option<u16>,

    /// Agent answering /api/agents/chat
    #[arg(long, value_enum)]
    pub mode: Option<AgentMode>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SeedArgs {
    /// CSV file with the project inventory
    #[arg(value_name = "CSV")]
    pub csv: PathBuf,

    /// Import even when the database already holds projects
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct IngestArgs {
    /// Documents embedded per request
    #[arg(long, value_name = "COUNT")]
    pub batch_size: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AskArgs {
    /// The question to ask
    #[arg(value_name = "MESSAGE")]
    pub message: String,

    /// Agent to use (graph works without an LLM)
    #[arg(long, value_enum)]
    pub mode: Option<AgentMode>,

    /// Print the full JSON payload instead of the reply text
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Serve(serve) => {
                if serve.port == Some(0) {
                    return Err("Port must be between 1 and 65535".to_string());
                }
            }
            Command::Seed(seed) => {
                if !seed.csv.is_file() {
                    return Err(format!("CSV file does not exist: {}", seed.csv.display()));
                }
            }
            Command::Ingest(ingest) => {
                if ingest.batch_size == Some(0) {
                    return Err("Batch size must be at least 1".to_string());
                }
            }
            Command::Ask(ask) => {
                if ask.message.trim().is_empty() {
                    return Err("Message must not be empty".to_string());
                }
            }
            Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Progress bars are hidden in quiet mode.
    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_serve() {
        let args = parse(&["concierge", "serve", "--port", "9000", "--mode", "tools", "-v"]);
        match &args.command {
            Command::Serve(serve) => {
                assert_eq!(serve.port, Some(9000));
                assert_eq!(serve.mode, Some(AgentMode::Tools));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(args.verbose);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_ask_and_init_config() {
        let args = parse(&["concierge", "--database", "x.db", "ask", "villas in Dubai"]);
        assert_eq!(args.database, Some(PathBuf::from("x.db")));
        assert!(matches!(args.command, Command::Ask(ref a) if a.message == "villas in Dubai"));

        let args = parse(&["concierge", "init-config"]);
        assert!(matches!(args.command, Command::InitConfig));
    }

    #[test]
    fn test_validation() {
        let missing = parse(&["concierge", "seed", "/definitely/not/here.csv"]);
        assert!(missing.validate().is_err());

        let blank = parse(&["concierge", "ask", "  "]);
        assert!(blank.validate().is_err());

        let conflicting = parse(&["concierge", "-v", "-q", "init-config"]);
        assert!(conflicting.validate().is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        let seed = parse(&["concierge", "seed", file.path().to_str().unwrap()]);
        assert!(seed.validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["concierge", "init-config"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
        assert!(!args.show_progress());
    }
}
