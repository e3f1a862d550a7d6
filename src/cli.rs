use clap::{ArgAction, Parser};
use log::LevelFilter;

pub const DEFAULT_CONTROL_PORT: u16 = 3333;

/// Bump-in-the-wire proxy that manipulates TCP acknowledgments between two
/// interfaces.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Interfaces to bridge: first the one facing the connection initiator,
    /// then the one facing the responder.
    #[arg(
        short = 'i',
        long = "iface",
        value_name = "IFACE",
        required = true,
        num_args = 2,
        action = ArgAction::Append
    )]
    pub ifaces: Vec<String>,

    /// TCP port of the control channel.
    #[arg(short, long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub port: u16,

    /// More output per occurrence (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Seconds between connection summaries; 0 disables them.
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    pub stats_interval: u64,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
