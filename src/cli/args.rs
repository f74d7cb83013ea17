//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// keg - Homebrew package state cache and formula catalog mirror
#[derive(Parser, Debug)]
#[command(name = "keg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KEG_CONFIG")]
    pub config: Option<PathBuf>,

    /// State directory for the catalog and package cache
    #[arg(long, global = true, env = "KEG_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror and search the formula catalog
    Catalog(CatalogArgs),

    /// Inspect and maintain the package state cache
    State(StateArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub action: CatalogAction,
}

#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Fetch the upstream catalog if the local copy is stale
    Refresh {
        /// Ignore the refresh interval
        #[arg(short, long)]
        force: bool,
    },

    /// Show metadata of the local catalog
    Info {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Search formulae by name, alias and description
    Search(SearchArgs),
}

#[derive(Parser, Debug)]
pub struct SearchArgs {
    /// Search term (lists everything when omitted)
    pub query: Option<String>,

    /// Match whole names and aliases only
    #[arg(short, long)]
    pub exact: bool,

    /// Treat the query as a case-insensitive regular expression
    #[arg(short, long, conflicts_with = "exact")]
    pub regex: bool,

    /// Do not match descriptions
    #[arg(long)]
    pub no_desc: bool,

    /// Maximum number of results (0 = all)
    #[arg(short, long, default_value = "50")]
    pub limit: usize,

    /// Refresh the catalog first, ignoring the refresh interval
    #[arg(long)]
    pub refresh: bool,

    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Print name, aliases and description separated by tabs, for fzf
    #[arg(long, conflicts_with = "format")]
    pub fzf: bool,
}

#[derive(Parser, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub action: StateAction,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Show cached state for packages (all installed when no names are given)
    Show {
        names: Vec<String>,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Query the package manager and rebuild the cache
    Refresh {
        /// Ignore the cache TTL
        #[arg(short, long)]
        force: bool,
    },

    /// List installed packages with a newer version available
    Outdated {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Fetch installed and latest versions for specific packages
    Versions {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Drop entries, or mark the whole cache stale when no names are given
    Invalidate { names: Vec<String> },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// One name per line
    Plain,
}

impl OutputFormat {
    pub fn is_machine(self) -> bool {
        !matches!(self, Self::Table)
    }
}
