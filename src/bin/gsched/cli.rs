use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use clap::{ArgAction, Parser};
use gsched::core::engine::Method;
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Cyan.on_default())
}

/// Deadline-aware GPU job scheduler and simulator.
#[derive(Debug, Parser)]
#[command(version, about, styles = styles())]
pub struct Cli {
    /// Scheduling method: FIFO, EDF, PS, G, RG, LS, PR or STS
    #[arg(long, short)]
    pub method: Method,

    /// Data directory holding the four input tables
    #[arg(long, short)]
    pub folder: PathBuf,

    /// Simulation start time in seconds
    #[arg(long, default_value_t = 0.0)]
    pub current_time: f64,

    /// Seed for the randomized methods
    #[arg(long, short, default_value_t = 4010)]
    pub seed: u64,

    /// Verbosity: 0 = warnings, 1 = info, 2 = debug, 3 = trace
    #[arg(long, short, default_value_t = 0)]
    pub verbose: u8,

    /// Drive the full discrete-event simulation (false = one scheduling
    /// pass at the given current time)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub simulation: bool,

    /// Account with real execution times and their table column
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub stochastic: bool,

    /// Override the randomized-iteration count from the config
    #[arg(long)]
    pub iter: Option<u32>,

    /// Explicit config file (gsched.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
