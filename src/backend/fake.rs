//! Scripted in-memory backend for engine tests

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{AppState, AutomationBackend, ElementHandle, InstallOptions};
use crate::model::{LocatorStrategy, SwipeDirection};

type LocatorKey = (LocatorStrategy, String);

/// Test double that records every call and answers from scripted state
#[derive(Default)]
pub struct FakeBackend {
    /// Chronological log of calls, for ordering assertions
    pub calls: Mutex<Vec<String>>,
    elements: Mutex<HashMap<LocatorKey, String>>,
    texts: Mutex<HashMap<String, String>>,
    /// Locators whose resolution never completes (for timeout tests)
    hanging: Mutex<HashSet<LocatorKey>>,
    app_states: Mutex<VecDeque<AppState>>,
    installed: Mutex<bool>,
    /// Action names that should fail when invoked
    failing_actions: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            installed: Mutex::new(true),
            ..Default::default()
        }
    }

    pub fn with_element(
        self,
        strategy: LocatorStrategy,
        value: &str,
        handle: &str,
    ) -> Self {
        self.elements
            .lock()
            .unwrap()
            .insert((strategy, value.to_string()), handle.to_string());
        self
    }

    pub fn with_text(self, handle: &str, text: &str) -> Self {
        self.texts
            .lock()
            .unwrap()
            .insert(handle.to_string(), text.to_string());
        self
    }

    pub fn with_hanging(self, strategy: LocatorStrategy, value: &str) -> Self {
        self.hanging
            .lock()
            .unwrap()
            .insert((strategy, value.to_string()));
        self
    }

    /// Script the sequence of app states returned by `query_app_state`;
    /// the last entry repeats once the script is exhausted.
    pub fn with_app_states(self, states: &[AppState]) -> Self {
        *self.app_states.lock().unwrap() = states.iter().copied().collect();
        self
    }

    pub fn with_installed(self, installed: bool) -> Self {
        *self.installed.lock().unwrap() = installed;
        self
    }

    pub fn with_failing_action(self, action: &str) -> Self {
        self.failing_actions
            .lock()
            .unwrap()
            .insert(action.to_string());
        self
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn check_failure(&self, action: &str) -> Result<()> {
        if self.failing_actions.lock().unwrap().contains(action) {
            anyhow::bail!("{} rejected by backend", action);
        }
        Ok(())
    }
}

#[async_trait]
impl AutomationBackend for FakeBackend {
    fn session_id(&self) -> &str {
        "fake-session"
    }

    async fn find_element(
        &self,
        strategy: LocatorStrategy,
        value: &str,
    ) -> Result<ElementHandle> {
        self.record(format!("find {}={}", strategy.as_str(), value));
        let key = (strategy, value.to_string());

        if self.hanging.lock().unwrap().contains(&key) {
            // Longer than any per-attempt timeout used in tests
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        match self.elements.lock().unwrap().get(&key) {
            Some(handle) => Ok(ElementHandle(handle.clone())),
            None => anyhow::bail!("no such element"),
        }
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.record(format!("click {}", element.0));
        self.check_failure("click")
    }

    async fn clear(&self, element: &ElementHandle) -> Result<()> {
        self.record(format!("clear {}", element.0));
        self.check_failure("clear")
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.record(format!("send_keys {} {}", element.0, text));
        self.check_failure("send_keys")
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String> {
        self.record(format!("text {}", element.0));
        self.check_failure("element_text")?;
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(&element.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn long_press(&self, element: &ElementHandle, duration_ms: u64) -> Result<()> {
        self.record(format!("long_press {} {}", element.0, duration_ms));
        self.check_failure("long_press")
    }

    async fn query_app_state(&self, app_id: &str) -> Result<AppState> {
        self.record(format!("app_state {}", app_id));
        let mut states = self.app_states.lock().unwrap();
        if states.len() > 1 {
            Ok(states.pop_front().unwrap())
        } else {
            Ok(states.front().copied().unwrap_or(AppState::Foreground))
        }
    }

    async fn is_app_installed(&self, app_id: &str) -> Result<bool> {
        self.record(format!("is_installed {}", app_id));
        Ok(*self.installed.lock().unwrap())
    }

    async fn install_app(&self, path: &Path, _options: &InstallOptions) -> Result<()> {
        self.record(format!("install {}", path.display()));
        self.check_failure("install_app")?;
        *self.installed.lock().unwrap() = true;
        Ok(())
    }

    async fn remove_app(&self, app_id: &str) -> Result<()> {
        self.record(format!("remove {}", app_id));
        *self.installed.lock().unwrap() = false;
        Ok(())
    }

    async fn activate_app(&self, app_id: &str) -> Result<()> {
        self.record(format!("activate {}", app_id));
        self.check_failure("activate_app")
    }

    async fn terminate_app(&self, app_id: &str) -> Result<()> {
        self.record(format!("terminate {}", app_id));
        self.check_failure("terminate_app")
    }

    async fn back(&self) -> Result<()> {
        self.record("back");
        self.check_failure("back")
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.record("screenshot");
        self.check_failure("screenshot")?;
        // Minimal PNG header; enough for file-writing tests
        Ok(vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'])
    }

    async fn window_size(&self) -> Result<(u32, u32)> {
        self.record("window_size");
        Ok((1080, 1920))
    }

    async fn swipe(&self, direction: SwipeDirection) -> Result<()> {
        self.record(format!("swipe {}", direction.as_str()));
        self.check_failure("swipe")
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}
