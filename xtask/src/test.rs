use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// Crates with host tests; the firmware crate runs its own against the simulators.
const TESTED_CRATES: [&str; 7] = ["platform", "sdcard", "flash", "track", "playback", "firmware", "xtask"];

pub fn run(unit_only: bool, integration_only: bool) -> Result<()> {
    println!();
    println!("{}", "🧪 Running host tests...".cyan().bold());
    println!();

    let total_start = Instant::now();

    if !integration_only {
        println!("{}", "  Running unit tests...".cyan());
        for krate in TESTED_CRATES {
            // xtask is a binary crate; its unit tests live in the bin target.
            let selector: &[&str] = if krate == "xtask" { &["--bins"] } else { &["--lib"] };
            run_suite(krate, selector, true)?;
        }
        println!();
    }

    if !unit_only {
        println!("{}", "  Running integration tests...".cyan());
        for krate in TESTED_CRATES {
            // No tests/ directory in xtask.
            if krate != "xtask" {
                run_suite(krate, &["--test", "*"], true)?;
            }
        }
        println!();
    }

    println!("{}", "  Running doc tests...".cyan());
    for krate in TESTED_CRATES.iter().filter(|k| **k != "xtask") {
        // Don't fail on doc test failures
        run_suite(krate, &["--doc"], false)?;
    }
    println!();

    println!(
        "{}",
        format!(
            "✓ All tests completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}

fn run_suite(krate: &str, selector: &[&str], required: bool) -> Result<()> {
    let start = Instant::now();
    let mut cmd = Command::new("cargo");
    cmd.args(["test", "-p", krate]).args(selector);
    let output = cmd
        .output()
        .with_context(|| format!("Failed to run tests for {krate}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        println!(
            "{}",
            format!(
                "    ✓ {krate}: {} in {:.2}s",
                extract_test_summary(&stdout),
                start.elapsed().as_secs_f64()
            )
            .green()
        );
        return Ok(());
    }

    if !required {
        println!("{}", format!("    ⚠ {krate}: doc tests failed").yellow());
        return Ok(());
    }
    eprintln!("{}", format!("    ✗ {krate} failed").red().bold());
    eprintln!();
    for line in stdout.lines() {
        eprintln!("  {}", line);
    }
    eprintln!("{}", String::from_utf8_lossy(&output.stderr));
    anyhow::bail!("Tests failed in {krate}");
}

fn extract_test_summary(output: &str) -> String {
    // Look for lines like "test result: ok. 5 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out"
    let mut passed = 0u32;
    let mut failed = 0u32;
    let mut seen = false;
    for line in output.lines() {
        let Some(summary) = line.split("test result:").nth(1) else {
            continue;
        };
        seen = true;
        for part in summary.split(';') {
            let mut words = part.split_whitespace().rev();
            let (Some(label), Some(count)) = (words.next(), words.next()) else {
                continue;
            };
            let count: u32 = count.parse().unwrap_or(0);
            match label {
                "passed" => passed += count,
                "failed" => failed += count,
                _ => {}
            }
        }
    }
    if seen {
        format!("{passed} passed, {failed} failed")
    } else {
        "(summary not available)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::extract_test_summary;

    #[test]
    fn sums_every_result_line() {
        let output = "running 3 tests\n\
            test result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n\
            test result: ok. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out\n";
        assert_eq!(extract_test_summary(output), "5 passed, 1 failed");
    }

    #[test]
    fn missing_summary_is_reported() {
        assert_eq!(extract_test_summary("error: no tests"), "(summary not available)");
    }
}
