//! rig - watch a host for an event, collect diagnostics when it fires.
//!
//! Subcommands either deploy a new rig (`create`) or talk to already
//! deployed rigs over their control sockets (`list`, `info`,
//! `destroy`).
//!
//! # Fork safety
//!
//! `create` detaches with the double-fork pattern, and `fork()` must
//! happen while the process is truly single-threaded. The Tokio runtime
//! spawns worker threads the moment it is built, so `main` stays
//! synchronous: parsing, validation, socket binding, and the fork all
//! run first, and only the detached child constructs a runtime and
//! enters the supervisor.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rig_core::error::RigError;

mod commands;

/// Monitor a system for events and trigger diagnostic collection.
#[derive(Parser, Debug)]
#[command(name = "rig")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy a rig from a rigfile
    Create {
        /// Path to the rigfile
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Stay in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Tabulate deployed rigs
    #[command(alias = "ls")]
    List,

    /// Show detailed status of one rig
    Info {
        /// Rig name
        #[arg(short = 'i', long = "id")]
        id: String,
    },

    /// Destroy deployed rig(s)
    Destroy {
        /// Rig name, or 'all'
        #[arg(short = 'i', long = "id")]
        id: String,

        /// Kill in-flight actions and remove stale sockets
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Everything rig does (reading arbitrary logs, dumping process
    // cores, packet captures) needs root; refuse early instead of
    // failing halfway through a deployment.
    if !nix::unistd::Uid::effective().is_root() {
        eprintln!("rig must be run as root");
        std::process::exit(RigError::NotRoot.exit_code());
    }

    let code = match cli.command {
        Commands::Create { file, foreground } => commands::create::run(&file, foreground),
        Commands::List => commands::list::run(),
        Commands::Info { id } => commands::info::run(&id),
        Commands::Destroy { id, force } => commands::destroy::run(&id, force),
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_takes_a_rigfile_path() {
        let cli = Cli::try_parse_from(["rig", "create", "-f", "/etc/rig/my.yaml"]).unwrap();
        match cli.command {
            Commands::Create { file, foreground } => {
                assert_eq!(file, PathBuf::from("/etc/rig/my.yaml"));
                assert!(!foreground);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn destroy_accepts_all_with_force() {
        let cli = Cli::try_parse_from(["rig", "destroy", "-i", "all", "--force"]).unwrap();
        match cli.command {
            Commands::Destroy { id, force } => {
                assert_eq!(id, "all");
                assert!(force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn list_has_an_ls_alias() {
        assert!(Cli::try_parse_from(["rig", "ls"]).is_ok());
    }

    #[test]
    fn create_requires_a_file() {
        assert!(Cli::try_parse_from(["rig", "create"]).is_err());
    }
}
