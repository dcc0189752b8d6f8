//! Host-to-device communication bridge
//!
//! Thin async wrappers over the `adb` and `emulator` host binaries.
//! The engine talks to the bridge through the [`DeviceBridge`] trait so
//! lifecycle logic can be exercised against a scripted fake.

pub mod adb;
pub mod emulator;

use anyhow::Result;
use async_trait::async_trait;

pub use adb::AdbBridge;

/// Link state of a connected device as reported by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Fully connected and addressable
    Online,
    /// Visible but not responding
    Offline,
    /// Connected but the host is not authorized
    Unauthorized,
    Other(String),
}

impl LinkState {
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => LinkState::Online,
            "offline" => LinkState::Offline,
            "unauthorized" => LinkState::Unauthorized,
            other => LinkState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LinkState::Online => "device",
            LinkState::Offline => "offline",
            LinkState::Unauthorized => "unauthorized",
            LinkState::Other(s) => s,
        }
    }
}

/// A device visible to the bridge
#[derive(Debug, Clone)]
pub struct Device {
    pub serial: String,
    pub state: LinkState,
}

impl Device {
    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }
}

/// Bridge operations the engine depends on
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// List devices currently visible to the bridge
    async fn devices(&self) -> Result<Vec<Device>>;

    /// Run a shell command on a device and return stdout
    async fn shell(&self, serial: &str, cmd: &str) -> Result<String>;

    /// Read a system property
    async fn getprop(&self, serial: &str, prop: &str) -> Result<String>;

    /// Restart the bridge server to clear cached link state
    async fn restart_server(&self) -> Result<()>;
}
