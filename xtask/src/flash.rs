//! xtask flash: build the player firmware and load it with probe-rs.
//!
//! By default the image is run under probe-rs so the defmt log streams to
//! the terminal. `--detach` downloads and resets instead, leaving the board
//! running on its own (the usual case once a card is fitted and the unit is
//! in its enclosure).

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::Colorize;

const TARGET: &str = "thumbv7em-none-eabihf";
const CHIP: &str = "STM32H743ZITx";
const PACKAGE: &str = "firmware";

/// Flash bank size from `memory.x`; an image past this will not link, but a
/// nearly full bank is worth a warning.
const FLASH_BYTES: u64 = 2 * 1024 * 1024;

pub fn run(release: bool, detach: bool) -> Result<()> {
    let profile = if release { "release" } else { "debug" };

    println!();
    println!(
        "{}",
        format!("🔨 Building player firmware ({profile})...").cyan().bold()
    );

    let build_start = Instant::now();
    let output = build_command(release)
        .output()
        .context("Failed to run cargo build")?;
    if !output.status.success() {
        eprintln!("{}", "✗ Build failed".red().bold());
        eprintln!();
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        anyhow::bail!("Build failed");
    }
    println!(
        "{}",
        format!("✓ Built in {:.2}s", build_start.elapsed().as_secs_f64()).green()
    );

    let image = firmware_path(&target_dir(), release);
    report_size(&image)?;
    println!();

    println!("{}", format!("📡 Loading {} onto {CHIP}...", image.display()).cyan().bold());
    let flash_start = Instant::now();
    for mut cmd in probe_commands(&image, detach) {
        let status = cmd
            .status()
            .context("Failed to run probe-rs. Is probe-rs installed? (cargo install probe-rs-tools)")?;
        if !status.success() {
            eprintln!("{}", "✗ probe-rs failed".red().bold());
            anyhow::bail!("Flash failed - check that the probe is connected and the board is powered");
        }
    }

    if detach {
        println!(
            "{}",
            format!("✓ Loaded and reset in {:.2}s", flash_start.elapsed().as_secs_f64()).green()
        );
        println!(
            "   {}",
            format!("Use 'probe-rs attach --chip {CHIP} {}' for the RTT log", image.display()).dimmed()
        );
    }
    println!();
    Ok(())
}

fn build_command(release: bool) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(["build", "-p", PACKAGE, "--bin", PACKAGE, "--target", TARGET, "--features", "hardware"])
        // Release images drop debug strings unless the caller asks for them.
        .env(
            "DEFMT_LOG",
            env::var("DEFMT_LOG").unwrap_or_else(|_| default_log_level(release).to_owned()),
        );
    if release {
        cmd.arg("--release");
    }
    cmd
}

/// `run` streams the log until Ctrl-C; a detached load is a download
/// followed by a reset.
fn probe_commands(image: &Path, detach: bool) -> Vec<Command> {
    let probe = |verb: &str| {
        let mut cmd = Command::new("probe-rs");
        cmd.args([verb, "--chip", CHIP]);
        cmd
    };
    if detach {
        let mut download = probe("download");
        download.arg(image);
        vec![download, probe("reset")]
    } else {
        let mut run = probe("run");
        run.arg(image);
        vec![run]
    }
}

/// Build-time defmt filter when `DEFMT_LOG` is unset.
fn default_log_level(release: bool) -> &'static str {
    if release {
        "info"
    } else {
        "debug"
    }
}

/// `CARGO_TARGET_DIR`, or `target/` at the workspace root.
fn target_dir() -> PathBuf {
    env::var_os("CARGO_TARGET_DIR").map_or_else(
        || {
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("target")
        },
        PathBuf::from,
    )
}

fn firmware_path(target_dir: &Path, release: bool) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    target_dir.join(TARGET).join(profile).join(PACKAGE)
}

/// Print the section sizes from `rust-size`, and warn when the loadable
/// part is close to filling the flash bank.
fn report_size(image: &Path) -> Result<()> {
    let Ok(out) = Command::new("rust-size").arg(image).output() else {
        println!("   {}", "rust-size not found; skipping size report (cargo install cargo-binutils)".dimmed());
        return Ok(());
    };
    if !out.status.success() {
        return Ok(());
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    let Some(flash_used) = loadable_bytes(&stdout) else {
        return Ok(());
    };
    let percent = flash_used * 100 / FLASH_BYTES;
    let line = format!("📊 {flash_used} bytes of flash ({percent}%)");
    if percent >= 90 {
        println!("{}", line.yellow());
    } else {
        println!("{}", line.cyan());
    }
    Ok(())
}

/// `text + data` from Berkeley-format `size` output.
fn loadable_bytes(size_output: &str) -> Option<u64> {
    let row = size_output.lines().nth(1)?;
    let mut columns = row.split_whitespace().map(str::parse::<u64>);
    let text = columns.next()?.ok()?;
    let data = columns.next()?.ok()?;
    Some(text + data)
}
