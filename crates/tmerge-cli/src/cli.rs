use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tmerge",
    about = "tmerge — lease-counted raster/platform thread merging",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a frame loop where call sites lease the raster/platform merge
    Simulate(SimulateArgs),
    /// Print the effective simulation configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// TOML file with simulation and merger settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Number of frames to draw (at most 1000000)
    #[arg(long)]
    pub frames: Option<u32>,
    /// Number of independent call sites leasing the merge
    #[arg(long)]
    pub callers: Option<u32>,
    /// Lease term (in frames) each call site requests
    #[arg(long)]
    pub lease: Option<u32>,
    /// A call site shows platform views once every this many frames
    #[arg(long)]
    pub view_interval: Option<u32>,
    /// Print one line per frame
    #[arg(long)]
    pub trace: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML file to merge over the defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
