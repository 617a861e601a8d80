use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::platform::Platform;

#[derive(Debug, Parser)]
#[command(
    name = "activity-feed",
    about = "List the merge requests and issues you are involved in, with an offline cache",
    args_conflicts_with_subcommands = true
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
    #[command(flatten)]
    pub(crate) fetch: FetchArgs,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Fetch and print activity (the default).
    Fetch(FetchArgs),
    /// Delete the cache database.
    Clean {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a config template.
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub(crate) enum ConfigCommands {
    /// Print the resolved config path and where it came from.
    Path,
}

#[derive(Debug, Clone, Default, Args)]
pub(crate) struct FetchArgs {
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Show items from the last time range (1h, 2d, 3w, 4m, 1y).
    #[arg(long)]
    pub(crate) time: Option<String>,
    /// Read the local cache instead of the API.
    #[arg(long)]
    pub(crate) local: bool,
    /// Print links under each item.
    #[arg(long)]
    pub(crate) links: bool,
    /// Shortcut for --local --links.
    #[arg(long)]
    pub(crate) ll: bool,
    #[arg(long)]
    pub(crate) json: bool,
    /// Comma separated group[/subgroup]/repo paths.
    #[arg(long)]
    pub(crate) allowed_repos: Option<String>,
    #[arg(long, value_enum)]
    pub(crate) platform: Option<PlatformArg>,
    #[arg(long)]
    pub(crate) debug: bool,
}

impl FetchArgs {
    pub(crate) fn local_mode(&self) -> bool {
        self.local || self.ll
    }

    pub(crate) fn show_links(&self) -> bool {
        self.links || self.ll
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum PlatformArg {
    #[value(name = "gitlab")]
    GitLab,
    #[value(name = "github")]
    GitHub,
}

impl From<PlatformArg> for Platform {
    fn from(value: PlatformArg) -> Self {
        match value {
            PlatformArg::GitLab => Platform::GitLab,
            PlatformArg::GitHub => Platform::GitHub,
        }
    }
}

impl Cli {
    pub(crate) fn debug_requested(&self) -> bool {
        match &self.command {
            Some(Commands::Fetch(args)) => args.debug,
            _ => self.fetch.debug,
        }
    }
}
