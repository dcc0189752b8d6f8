use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{Device, DeviceBridge, LinkState};
use crate::utils::binaries;

/// Execute a raw adb command and return stdout
pub async fn exec(serial: Option<&str>, args: &[&str]) -> Result<String> {
    let mut full_args = Vec::new();

    if let Some(s) = serial {
        full_args.push("-s");
        full_args.push(s);
    }

    full_args.extend_from_slice(args);

    let adb_path = binaries::find_adb()?;
    let output = Command::new(adb_path)
        .args(&full_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to execute: adb {:?}", full_args))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("adb command failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Execute an adb shell command on a device
pub async fn shell(serial: &str, cmd: &str) -> Result<String> {
    exec(Some(serial), &["shell", cmd]).await
}

/// Parse `adb devices` output into device entries
///
/// The first line is the banner; every following non-empty line is
/// `<serial>\t<state>`.
pub fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            devices.push(Device {
                serial: parts[0].to_string(),
                state: LinkState::parse(parts[1]),
            });
        }
    }

    devices
}

/// List devices currently visible to adb
pub async fn devices() -> Result<Vec<Device>> {
    let output = exec(None, &["devices"]).await?;
    Ok(parse_devices(&output))
}

/// Real bridge backed by the adb binary
pub struct AdbBridge;

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn devices(&self) -> Result<Vec<Device>> {
        devices().await
    }

    async fn shell(&self, serial: &str, cmd: &str) -> Result<String> {
        shell(serial, cmd).await
    }

    async fn getprop(&self, serial: &str, prop: &str) -> Result<String> {
        let out = shell(serial, &format!("getprop {}", prop)).await?;
        Ok(out.trim().to_string())
    }

    async fn restart_server(&self) -> Result<()> {
        // kill-server exits non-zero when no server was running; ignore it
        let _ = exec(None, &["kill-server"]).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        exec(None, &["start-server"])
            .await
            .context("failed to restart adb server")?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }
}
