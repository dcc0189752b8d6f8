//! SDK binary resolution
//!
//! Locates the `adb` and `emulator` host binaries. Resolution order:
//! ANDROID_HOME (or the default SDK install location), then system PATH.

use anyhow::Result;
use std::path::PathBuf;

fn sdk_root() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("ANDROID_HOME") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    if let Ok(home) = std::env::var("ANDROID_SDK_ROOT") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    // Default Android Studio install location
    dirs::home_dir().map(|h| {
        if cfg!(target_os = "macos") {
            h.join("Library/Android/sdk")
        } else {
            h.join("Android/Sdk")
        }
    })
}

fn find_sdk_binary(subdir: &str, name: &str) -> Result<PathBuf> {
    let mut checked = Vec::new();

    if let Some(root) = sdk_root() {
        let candidate = if cfg!(windows) {
            root.join(subdir).join(format!("{}.exe", name))
        } else {
            root.join(subdir).join(name)
        };
        checked.push(format!("SDK: {}", candidate.display()));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    if let Ok(path) = which::which(name) {
        return Ok(path);
    }
    checked.push(format!("PATH: {}", name));

    Err(anyhow::anyhow!(
        "could not find '{}'. Checked:\n{}",
        name,
        checked.join("\n")
    ))
}

/// Locate the adb binary
pub fn find_adb() -> Result<PathBuf> {
    find_sdk_binary("platform-tools", "adb")
}

/// Locate the emulator binary
pub fn find_emulator() -> Result<PathBuf> {
    find_sdk_binary("emulator", "emulator")
}
