//! permfsm - Permissioned state machine
//!
//! Operates one journaled machine from the command line. Every invocation
//! replays the journal in the data directory, runs one operation and exits.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use permfsm_core::{Account, InterfaceId, RoleId, Selector, StateId};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "permfsm")]
#[command(about = "Role-gated state machine with an append-only transition history")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "PERMFSM_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the machine journal (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Account to act as
    #[arg(long = "as", value_name = "ACCOUNT")]
    account: Option<Account>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a machine in the data directory
    Init {
        /// Definition file (.yaml, .yml or .json); the generic template if omitted
        definition: Option<PathBuf>,

        /// Entity the machine describes
        #[arg(long)]
        entity_id: Option<u64>,

        /// Content hash of the entity metadata document
        #[arg(long, requires = "entity_id")]
        content_hash: Option<String>,

        /// Base URI for entity metadata
        #[arg(long, default_value = "")]
        base_uri: String,
    },

    /// Show the current state and machine summary
    Show,

    /// List every state with its edges and roles
    States,

    /// Show one state
    State {
        state: StateId,
    },

    /// Transition to a state
    Transition {
        to_state: StateId,

        /// Role to act under
        #[arg(short, long)]
        role: RoleId,
    },

    /// Grant a role to an account
    Grant {
        role: String,
        account: Account,
    },

    /// Revoke a role from an account
    Revoke {
        role: RoleId,
        account: Account,
    },

    /// Give up a role held by the acting account
    Renounce {
        role: RoleId,
    },

    /// Check whether an account holds a role
    HasRole {
        role: RoleId,
        account: Account,
    },

    /// Check whether a role may act in the current state
    CheckRole {
        role: RoleId,
    },

    /// Add a state to the graph
    AddState {
        state: StateId,
    },

    /// Add an edge between two states
    AddNext {
        state: StateId,
        next_state: StateId,
    },

    /// Allow a function selector in a state
    AddFunction {
        state: StateId,
        selector: Selector,
    },

    /// Set the pre-function of a state
    SetPre {
        state: StateId,
        selector: Selector,
    },

    /// Allow a role in a state and grant it to an account
    AddRole {
        state: StateId,
        role: RoleId,
        account: Account,
    },

    /// Print transition history
    History {
        /// Only the record at this index
        index: Option<u64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify journal integrity
    Verify,

    /// Print the metadata URI of an entity
    Uri {
        entity_id: u64,
    },

    /// Check whether the machine supports an interface
    Supports {
        interface_id: InterfaceId,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let caller = cli.account.or(config.account);
    tracing::debug!(data_dir = %config.storage.data_dir.display(), "using data directory");

    match commands::execute(cli.command, &config, caller) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
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
    fn test_parse_transition() {
        let cli = Cli::try_parse_from([
            "permfsm",
            "--as",
            "0x1111111111111111111111111111111111111111",
            "transition",
            "STATE_TWO",
            "--role",
            "ROLE_ADMIN",
        ])
        .unwrap();

        assert_eq!(cli.account, Some(Account::repeat_byte(0x11)));
        match cli.command {
            Commands::Transition { to_state, role } => {
                assert_eq!(to_state, StateId::literal("STATE_TWO"));
                assert_eq!(role, RoleId::literal("ROLE_ADMIN"));
            }
            _ => panic!("expected transition"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_account() {
        assert!(Cli::try_parse_from(["permfsm", "--as", "0x12", "show"]).is_err());
    }
}
