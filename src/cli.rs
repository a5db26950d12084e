use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// The command line interface for dock line.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Serial devices to forward, e.g. `/dev/ttyUSB0,/dev/ttyUSB1`.
    /// Replaces any devices from the configuration file.
    #[arg(short, long, value_delimiter = ',')]
    pub devices: Option<Vec<String>>,

    /// Per-device carrier options, e.g. `/dev/ttyS0=direct`.
    /// Devices without an option are monitored.
    #[arg(short = 'o', long = "serial-options", value_delimiter = ',')]
    pub serial_options: Vec<String>,

    /// Host name of the dockserver
    #[arg(short, long)]
    pub server: Option<String>,

    /// Dockserver TCP port for incoming network connections
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Also write daily-rotated debug logs to a file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Print whatever the given command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty())
        }
    }
}
