use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "longseason", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage registered users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage registered devices
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },

    /// Show counters from the last committed tick
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Read address batches from stdin and keep statuses up to date
    Run {
        /// Ingest all of stdin, reconcile once and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Register a user
    Add { nickname: String },
    /// Remove a user and their devices
    Remove { id: String },
    /// List users with their online flag
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommands {
    /// Register a device; the address is hashed before it is stored
    Add {
        user_id: String,
        tag: String,
        address: String,
    },
    /// Remove a device
    Remove { id: String },
    /// List a user's devices
    List { user_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_add() {
        let cli = Cli::try_parse_from([
            "longseason",
            "-c",
            "ls.yaml",
            "device",
            "add",
            "u1",
            "phone",
            "aa:bb:cc:dd:ee:ff",
        ])
        .unwrap();

        assert_eq!(cli.config_path.as_deref(), Some("ls.yaml"));
        match cli.command {
            Commands::Device {
                command: DeviceCommands::Add { user_id, tag, address },
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(tag, "phone");
                assert_eq!(address, "aa:bb:cc:dd:ee:ff");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_once() {
        let cli = Cli::try_parse_from(["longseason", "run", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { once: true }));
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["longseason"]).is_err());
    }
}
