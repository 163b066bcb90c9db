//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drive the scheduler against the simulated executor
//! - preview: list upcoming operations
//! - config: show or validate the configuration
//! - ping: one-shot manual ping of a volume

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use revenant::domain::VolumeKind;

/// Revenant - keeps storage volumes awake with jittered sentinel I/O
#[derive(Parser, Debug)]
#[command(name = "revenant")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// A volume given on the command line as `ID=KIND` or `ID=KIND@INTERVAL`
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeArg {
    pub id: String,
    pub kind: VolumeKind,
    pub interval_secs: Option<u64>,
}

impl FromStr for VolumeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, rest) = s.split_once('=').unwrap_or((s, "unknown"));
        let (kind, interval) = match rest.split_once('@') {
            Some((kind, secs)) => {
                let secs = secs
                    .parse::<u64>()
                    .map_err(|_| format!("invalid interval '{}' in '{}'", secs, s))?;
                (kind, Some(secs))
            }
            None => (rest, None),
        };
        let id = revenant::config::normalize_volume_id(id);
        if id.is_empty() {
            return Err(format!("missing volume id in '{}'", s));
        }
        Ok(Self {
            id,
            kind: kind.parse()?,
            interval_secs: interval,
        })
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler against simulated volumes
    Run {
        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Extra volume as ID=KIND[@SECS], e.g. E:=HDD@120
        #[arg(long = "volume", value_name = "ID=KIND")]
        volumes: Vec<VolumeArg>,
    },

    /// Show the next planned operations
    Preview {
        /// Number of operations to list
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Show the effective configuration
    Config {
        /// Only report the corrections made while loading
        #[arg(long)]
        check: bool,
    },

    /// Ping a volume once, outside the schedule
    Ping {
        /// Volume id, e.g. E:
        volume: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_arg_parse() {
        let v: VolumeArg = "e=HDD".parse().unwrap();
        assert_eq!(v.id, "E:");
        assert_eq!(v.kind, VolumeKind::Hdd);
        assert_eq!(v.interval_secs, None);

        let v: VolumeArg = "F:=ssd@90".parse().unwrap();
        assert_eq!(v.id, "F:");
        assert_eq!(v.kind, VolumeKind::Ssd);
        assert_eq!(v.interval_secs, Some(90));
    }

    #[test]
    fn test_volume_arg_errors() {
        assert!("E:=HDD@soon".parse::<VolumeArg>().is_err());
        assert!("=HDD".parse::<VolumeArg>().is_err());
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["revenant", "run", "--seconds", "5", "--volume", "E:=HDD"]);
        match cli.command {
            Some(Commands::Run { seconds, volumes }) => {
                assert_eq!(seconds, Some(5));
                assert_eq!(volumes.len(), 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::parse_from(["revenant", "-v", "preview", "-n", "3"]);
        assert!(cli.is_verbose());
        assert!(matches!(cli.command, Some(Commands::Preview { count: 3 })));
    }
}
