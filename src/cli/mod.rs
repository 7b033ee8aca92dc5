//! CLI definitions using clap.

use crate::model::{EntityType, OperationKind, RunStatus};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// psync - Idempotent sync between a local application and a Protheus ERP
#[derive(Parser, Debug)]
#[command(name = "psync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.psync/data/psync.db)
    #[arg(long, global = true, env = "PSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Idempotency key (derived from the payload when omitted)
    #[arg(long, global = true)]
    pub key: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull a whole table
    Pull {
        /// Table name (see `psync tables`)
        table: String,

        /// Ask the remote for a full fetch
        #[arg(long)]
        reset: bool,
    },

    /// Pull the rows of a table where FIELD equals VALUE
    PullFilter {
        table: String,
        field: String,
        value: String,
    },

    /// Pull sales orders (SC5) issued within a period
    Orders {
        /// Start date (yyyymmdd)
        from: String,
        /// End date (yyyymmdd)
        to: String,
    },

    /// Pull invoices (SF2) issued within a period
    Invoices {
        /// Start date (yyyymmdd)
        from: String,
        /// End date (yyyymmdd)
        to: String,
    },

    /// Drop a table's local snapshots so the next pull fetches from zero
    Reset {
        table: String,
    },

    /// Create or update customers from a JSON file (`-` for stdin)
    Customers {
        file: PathBuf,
    },

    /// Create sales orders from a JSON file (`-` for stdin)
    Salesorders {
        file: PathBuf,
    },

    /// List sync runs, newest first
    Runs {
        /// Filter by operation kind
        #[arg(long)]
        kind: Option<OperationKind>,

        /// Filter by status (success, partial_failure, failed)
        #[arg(long)]
        status: Option<RunStatus>,

        #[arg(long, default_value_t = 50)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Show one sync run
    Run {
        id: String,
    },

    /// Inspect or reset the local-to-remote mapping
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },

    /// Remove expired idempotency records
    Sweep,

    /// List the tables available for pull
    Tables,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum MappingCommands {
    /// Show the mapping of one local key
    Get {
        /// customer or sales_order
        entity: EntityType,
        local_key: String,
    },

    /// List mappings of one entity type
    List {
        entity: EntityType,

        #[arg(long, default_value_t = 100)]
        limit: u32,
    },

    /// Delete every mapping of one entity type
    Reset {
        entity: EntityType,

        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_runs_filters() {
        let cli = Cli::parse_from([
            "psync", "runs", "--kind", "pull_orders", "--status", "failed", "--limit", "5",
        ]);
        match cli.command {
            Commands::Runs {
                kind,
                status,
                limit,
                offset,
            } => {
                assert_eq!(kind, Some(OperationKind::PullOrders));
                assert_eq!(status, Some(RunStatus::Failed));
                assert_eq!(limit, 5);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_key_after_subcommand() {
        let cli = Cli::parse_from(["psync", "pull", "sa1", "--key", "k-1", "--json"]);
        assert_eq!(cli.key.as_deref(), Some("k-1"));
        assert!(cli.json);
    }

    #[test]
    fn test_entity_accepts_order_alias() {
        let cli = Cli::parse_from(["psync", "mapping", "get", "order", "PED-1"]);
        assert!(matches!(
            cli.command,
            Commands::Mapping {
                command: MappingCommands::Get {
                    entity: EntityType::SalesOrder,
                    ..
                }
            }
        ));
    }
}
