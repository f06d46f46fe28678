use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::settings::SETTINGS_ENV;

#[derive(Parser, Debug)]
#[command(name = "beer-pos")]
#[command(about = "Beer venue order terminal with camera recognition", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Settings file (JSON)
    #[arg(long, global = true, env = SETTINGS_ENV)]
    pub settings: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open the order console (default)
    Run,

    /// Inspect or edit the menu
    Menu {
        #[command(subcommand)]
        action: MenuAction,
    },

    /// List saved bills
    History {
        /// Day, dd-mm-yyyy
        #[arg(short, long)]
        date: Option<String>,

        /// Table opened near this time, HH:MM
        #[arg(short, long)]
        start: Option<String>,

        /// Table closed near this time, HH:MM
        #[arg(short, long)]
        end: Option<String>,
    },

    /// Print one bill with its final quantities
    Show {
        bill: PathBuf,
    },

    /// Push a bill to the collector
    Send {
        bill: PathBuf,

        /// Overrides the configured collector host
        #[arg(long)]
        host: Option<String>,

        /// Overrides the configured collector port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Set the table this terminal serves
    Table {
        id: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum MenuAction {
    List,
    Add {
        name: String,
        price: f64,
    },
    Price {
        name: String,
        price: f64,
    },
    Remove {
        name: String,
    },
}
