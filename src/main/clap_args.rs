//! Command-line arguments: just the config file path. This binary's CLI
//! surface is `--config <path>` and nothing more — the admin console, not
//! flags, is where operational commands live.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
	/// Path to a TOML configuration file. Environment variables prefixed
	/// `SERVING_` override whatever this file sets.
	#[arg(short, long)]
	pub config: Option<PathBuf>,
}

#[must_use]
pub fn parse() -> Args { Args::parse() }
