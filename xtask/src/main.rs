// Desktop/tooling crate: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
// Host-side sample math; the firmware lint policy does not apply here.
#![allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
#![allow(missing_docs)]

mod check;
mod encode_track;
mod flash;
mod test;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Animatronic player development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the player firmware and load it via probe-rs
    Flash {
        /// Build and flash release version
        #[arg(short, long)]
        release: bool,
        /// Download and reset instead of streaming the RTT log
        #[arg(short, long)]
        detach: bool,
    },
    /// Check the firmware, the no_std crates and the lints
    Check,
    /// Run all host tests (unit, integration and doc)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
    },
    /// Convert a WAV file and a mechanical script into a card track image
    EncodeTrack {
        /// Mechanical script; its first line names the WAV file
        script: PathBuf,
        /// Track number (1-10); decides the output file name
        #[arg(short, long)]
        track: u8,
        /// Directory receiving `<n>.ULV`
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// Scale to the loudest sample instead of full scale
        #[arg(long)]
        normalize: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Flash { release, detach } => flash::run(release, detach),
        Commands::Check => check::run(),
        Commands::Test { unit, integration } => test::run(unit, integration),
        Commands::EncodeTrack {
            script,
            track,
            out_dir,
            normalize,
        } => encode_track::run(&script, track, &out_dir, normalize).map(|_| ()),
    }
}
