//! CLI command definitions
//!
//! All CLI structs and subcommand enums are defined here.

use bulkmail::config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};

/// BulkMail - rate-limited mail dispatch from a plain-text queue file
#[derive(Parser, Debug)]
#[command(name = "bulkmail")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "BULKMAIL_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    // =========================================================================
    // DISPATCH
    // =========================================================================
    /// Run the dispatcher, reading start/stop/delay commands from stdin
    Run {
        /// Log messages instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Start STOPPED; type `start` on stdin to begin sending
        #[arg(long)]
        paused: bool,

        /// Override mail.delay_seconds
        #[arg(long)]
        delay: Option<u64>,

        /// Do not watch the queue file for external appends
        #[arg(long)]
        no_watch: bool,

        /// Print Prometheus metrics on exit
        #[arg(long)]
        metrics: bool,
    },

    // =========================================================================
    // QUEUE INSPECTION
    // =========================================================================
    /// Show queue statistics
    Stats {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List pending and in-flight recipients
    Pending {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    // =========================================================================
    // QUEUE MAINTENANCE
    // =========================================================================
    /// Import addresses from a text or CSV file
    Import {
        /// File to scan for addresses (lists candidates when omitted)
        file: Option<String>,
    },

    /// Return abandoned SENDING claims to the queue
    ResetStale {
        /// Claim age in seconds after which it counts as abandoned
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Turn bare addresses in the queue file into PENDING records
    Reconcile,

    /// Validate the configuration file
    Check,

    // =========================================================================
    // SETUP
    // =========================================================================
    /// Create sample config, template and queue files
    Init {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from(["bulkmail", "run", "--dry-run", "--paused", "--delay", "5"]);
        assert_eq!(cli.config, DEFAULT_CONFIG_FILE);
        match cli.command {
            Commands::Run {
                dry_run,
                paused,
                delay,
                no_watch,
                metrics,
            } => {
                assert!(dry_run && paused && !no_watch && !metrics);
                assert_eq!(delay, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_config() {
        let cli = Cli::parse_from(["bulkmail", "stats", "--json", "--config", "alt.yaml"]);
        assert_eq!(cli.config, "alt.yaml");
        assert!(matches!(cli.command, Commands::Stats { json: true }));
    }

    #[test]
    fn test_parse_reset_stale_default() {
        let cli = Cli::parse_from(["bulkmail", "reset-stale"]);
        assert!(matches!(
            cli.command,
            Commands::ResetStale { timeout_secs: 300 }
        ));
    }
}
