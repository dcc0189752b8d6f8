//! Automation backend interface
//!
//! The engine drives the device UI through an automation server
//! speaking the W3C/Appium wire protocol. All app-lifecycle queries go
//! through the structured endpoints here, never through scraping a
//! subprocess's decorated text output.

pub mod client;

#[cfg(test)]
pub mod fake;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;

use crate::model::{LocatorStrategy, Platform, SwipeDirection};

pub use client::HttpBackend;

/// Opaque element reference returned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

/// Application run state as reported by the backend's structured query
///
/// Wire codes: 0 = not installed, 1 = not running, 2/3 = background,
/// 4 = foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    NotInstalled,
    NotRunning,
    Background,
    Foreground,
}

impl AppState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => AppState::NotInstalled,
            1 => AppState::NotRunning,
            2 | 3 => AppState::Background,
            _ => AppState::Foreground,
        }
    }
}

/// Install options for app deployment
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Replace an existing install
    pub replace: bool,
    /// Permit test-signed/debug packages
    pub allow_test_packages: bool,
    /// Auto-grant runtime permissions at install time
    pub grant_permissions: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            replace: true,
            allow_test_packages: true,
            grant_permissions: true,
        }
    }
}

/// Session capability configuration
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub platform_name: String,
    pub automation_name: String,
    pub device_serial: String,
    pub no_reset: bool,
    pub full_reset: bool,
    pub new_command_timeout_secs: u64,
    pub auto_grant_permissions: bool,
    pub disable_window_animation: bool,
}

impl Capabilities {
    pub fn for_device(platform: Platform, serial: &str) -> Self {
        let (platform_name, automation_name) = match platform {
            Platform::Android => ("Android", "UiAutomator2"),
            Platform::Ios => ("iOS", "XCUITest"),
        };
        Self {
            platform_name: platform_name.to_string(),
            automation_name: automation_name.to_string(),
            device_serial: serial.to_string(),
            no_reset: true,
            full_reset: false,
            new_command_timeout_secs: 300,
            auto_grant_permissions: true,
            disable_window_animation: true,
        }
    }

    /// Build the W3C `alwaysMatch` capability object
    pub fn to_w3c(&self) -> serde_json::Value {
        json!({
            "platformName": self.platform_name,
            "appium:automationName": self.automation_name,
            "appium:udid": self.device_serial,
            "appium:noReset": self.no_reset,
            "appium:fullReset": self.full_reset,
            "appium:newCommandTimeout": self.new_command_timeout_secs,
            "appium:autoGrantPermissions": self.auto_grant_permissions,
            "appium:disableWindowAnimation": self.disable_window_animation,
        })
    }
}

/// Operations the engine requires from an automation session
///
/// Implemented by [`HttpBackend`] for real runs and by a scripted fake
/// in tests.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Backend session identifier
    fn session_id(&self) -> &str;

    /// Find a single element; errors if not present right now
    async fn find_element(
        &self,
        strategy: LocatorStrategy,
        value: &str,
    ) -> Result<ElementHandle>;

    async fn click(&self, element: &ElementHandle) -> Result<()>;

    async fn clear(&self, element: &ElementHandle) -> Result<()>;

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()>;

    async fn element_text(&self, element: &ElementHandle) -> Result<String>;

    async fn long_press(&self, element: &ElementHandle, duration_ms: u64) -> Result<()>;

    /// Query app run state through the structured endpoint
    async fn query_app_state(&self, app_id: &str) -> Result<AppState>;

    async fn is_app_installed(&self, app_id: &str) -> Result<bool>;

    async fn install_app(&self, path: &Path, options: &InstallOptions) -> Result<()>;

    async fn remove_app(&self, app_id: &str) -> Result<()>;

    async fn activate_app(&self, app_id: &str) -> Result<()>;

    async fn terminate_app(&self, app_id: &str) -> Result<()>;

    /// Press the system back control
    async fn back(&self) -> Result<()>;

    /// Capture the screen as PNG bytes
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn window_size(&self) -> Result<(u32, u32)>;

    /// Whole-screen directional swipe
    async fn swipe(&self, direction: SwipeDirection) -> Result<()>;

    /// Release the session on the backend
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_codes() {
        assert_eq!(AppState::from_code(0), AppState::NotInstalled);
        assert_eq!(AppState::from_code(1), AppState::NotRunning);
        assert_eq!(AppState::from_code(2), AppState::Background);
        assert_eq!(AppState::from_code(3), AppState::Background);
        assert_eq!(AppState::from_code(4), AppState::Foreground);
    }

    #[test]
    fn test_capabilities_w3c_shape() {
        let caps = Capabilities::for_device(Platform::Android, "emulator-5554");
        let value = caps.to_w3c();
        assert_eq!(value["platformName"], "Android");
        assert_eq!(value["appium:automationName"], "UiAutomator2");
        assert_eq!(value["appium:udid"], "emulator-5554");
        assert_eq!(value["appium:autoGrantPermissions"], true);
        assert_eq!(value["appium:newCommandTimeout"], 300);
    }

    #[test]
    fn test_capabilities_ios() {
        let caps = Capabilities::for_device(Platform::Ios, "UDID-1");
        assert_eq!(caps.automation_name, "XCUITest");
    }
}
