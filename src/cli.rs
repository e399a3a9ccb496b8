// src/cli.rs
//! CLI definitions for wadsmith
//!
//! The command implementations are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wadsmith")]
#[command(author, version)]
#[command(about = "Fetch, build, verify and cache Wii title packages from a catalog", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./wadsmith.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog document, overriding paths.catalog
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a catalog entry and how it would be produced
    Lookup {
        /// Catalog id, or output filename with --filename
        id: String,

        /// Look the entry up by output filename
        #[arg(long)]
        filename: bool,
    },

    /// Verify a local package against a catalog entry's digests
    Verify {
        /// Package file
        file: PathBuf,

        /// Catalog id whose digests to check against
        #[arg(long)]
        id: String,
    },

    /// List patch map variants, or the bases of one variant
    Maps {
        variant: Option<String>,
    },

    /// Resolve catalog ids into the cache and print retrieval URLs
    Fetch {
        /// Catalog ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Ids resolved concurrently per window (default: batch.max_concurrent)
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Retry failed ids this many times
        #[arg(long, default_value_t = 0)]
        retry: u32,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fetch_args() {
        let cli = Cli::try_parse_from([
            "wadsmith", "-v", "fetch", "IOS56v5661", "HBC", "--max-concurrent", "2", "--retry", "1",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Commands::Fetch {
                ids,
                max_concurrent,
                retry,
                json,
            } => {
                assert_eq!(ids, vec!["IOS56v5661", "HBC"]);
                assert_eq!(max_concurrent, Some(2));
                assert_eq!(retry, 1);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_fetch_requires_ids() {
        assert!(Cli::try_parse_from(["wadsmith", "fetch"]).is_err());
    }

    #[test]
    fn test_quiet_level() {
        let cli = Cli::try_parse_from(["wadsmith", "-q", "maps"]).unwrap();
        assert_eq!(cli.log_level(), "warn");
    }
}
