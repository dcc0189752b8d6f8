use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;

use crate::utils::binaries;

/// List available virtual device profiles
pub async fn list_avds() -> Result<Vec<String>> {
    let emulator_path = binaries::find_emulator()?;
    let output = Command::new(emulator_path)
        .args(["-list-avds"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to execute emulator -list-avds")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("listing virtual devices failed: {}", stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Start a virtual device in the background
///
/// The process is detached; boot progress is observed through the
/// bridge, not through this handle.
pub async fn launch_detached(avd: &str) -> Result<()> {
    let emulator_path = binaries::find_emulator()?;
    Command::new(emulator_path)
        .args([
            "-avd",
            avd,
            "-no-snapshot-save",
            "-no-audio",
            "-no-boot-anim",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch virtual device '{}'", avd))?;
    Ok(())
}
