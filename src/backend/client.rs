//! HTTP client for the automation server
//!
//! Speaks the W3C WebDriver protocol plus the mobile extension
//! endpoints for app management. One [`HttpBackend`] owns exactly one
//! server-side session from `open()` until `close()`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::{AppState, AutomationBackend, Capabilities, ElementHandle, InstallOptions};
use crate::model::{LocatorStrategy, SwipeDirection};

/// Default automation server address
pub const DEFAULT_SERVER_URL: &str = "http://localhost:4723";

/// Per-request timeout for ordinary commands
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Session creation is slower than any other command: first attach runs
/// the backend's own on-device instrumentation.
const SESSION_CREATE_TIMEOUT: Duration = Duration::from_secs(60);

/// W3C element id key, with the legacy fallback key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    session_id: String,
}

impl HttpBackend {
    /// Create a session on the automation server
    pub async fn open(server_url: &str, capabilities: &Capabilities) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let base_url = server_url.trim_end_matches('/').to_string();
        let body = json!({
            "capabilities": {
                "alwaysMatch": capabilities.to_w3c(),
                "firstMatch": [{}],
            }
        });

        let resp = client
            .post(format!("{}/session", base_url))
            .timeout(SESSION_CREATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("automation server unreachable at {}", base_url))?;

        let value = Self::parse_response(resp).await?;
        let session_id = value["sessionId"]
            .as_str()
            .or_else(|| value["value"]["sessionId"].as_str())
            .ok_or_else(|| anyhow::anyhow!("no session id in create response"))?
            .to_string();

        Ok(Self {
            base_url,
            client,
            session_id,
        })
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    /// Check the HTTP status and unwrap the W3C response envelope,
    /// surfacing the server's diagnostic message on failure.
    async fn parse_response(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        if !status.is_success() {
            let message = value["value"]["message"]
                .as_str()
                .or_else(|| value["value"]["error"].as_str())
                .map(String::from)
                .unwrap_or(body);
            anyhow::bail!("{}", message.trim());
        }

        Ok(value)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(self.session_url(path))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request failed: POST {}", path))?;
        Self::parse_response(resp).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .client
            .get(self.session_url(path))
            .send()
            .await
            .with_context(|| format!("request failed: GET {}", path))?;
        Self::parse_response(resp).await
    }

    /// Run a mobile extension command via execute/sync
    async fn execute(&self, script: &str, args: Value) -> Result<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": [args] }))
            .await
    }

    fn wire_locator(strategy: LocatorStrategy, value: &str) -> (String, String) {
        match strategy {
            LocatorStrategy::Id => ("id".to_string(), value.to_string()),
            LocatorStrategy::AccessibilityId => ("accessibility id".to_string(), value.to_string()),
            LocatorStrategy::Xpath => ("xpath".to_string(), value.to_string()),
            LocatorStrategy::ClassName => ("class name".to_string(), value.to_string()),
            // No first-class wire strategy for visible text; translate
            // to an attribute XPath.
            LocatorStrategy::Text => (
                "xpath".to_string(),
                format!("//*[@text={}]", xpath_literal(value)),
            ),
        }
    }
}

/// Quote a string for embedding in an XPath expression
///
/// XPath 1.0 has no escape sequence inside string literals, so values
/// containing both quote kinds need the concat() form.
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value
            .split('\'')
            .map(|part| format!("'{}'", part))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

#[async_trait]
impl AutomationBackend for HttpBackend {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn find_element(
        &self,
        strategy: LocatorStrategy,
        value: &str,
    ) -> Result<ElementHandle> {
        let (using, wire_value) = Self::wire_locator(strategy, value);
        let response = self
            .post("/element", json!({ "using": using, "value": wire_value }))
            .await?;

        let element_id = response["value"][ELEMENT_KEY]
            .as_str()
            .or_else(|| response["value"][LEGACY_ELEMENT_KEY].as_str())
            .ok_or_else(|| anyhow::anyhow!("no element id in response"))?;

        Ok(ElementHandle(element_id.to_string()))
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<()> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.post(
            &format!("/element/{}/value", element.0),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String> {
        let response = self.get(&format!("/element/{}/text", element.0)).await?;
        Ok(response["value"].as_str().unwrap_or_default().to_string())
    }

    async fn long_press(&self, element: &ElementHandle, duration_ms: u64) -> Result<()> {
        self.execute(
            "mobile: longClickGesture",
            json!({ "elementId": element.0, "duration": duration_ms }),
        )
        .await?;
        Ok(())
    }

    async fn query_app_state(&self, app_id: &str) -> Result<AppState> {
        let response = self
            .post("/appium/device/app_state", json!({ "appId": app_id }))
            .await?;
        let code = response["value"]
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("non-numeric app state in response"))?;
        Ok(AppState::from_code(code))
    }

    async fn is_app_installed(&self, app_id: &str) -> Result<bool> {
        let response = self
            .post(
                "/appium/device/app_installed",
                json!({ "appId": app_id, "bundleId": app_id }),
            )
            .await?;
        Ok(response["value"].as_bool().unwrap_or(false))
    }

    async fn install_app(&self, path: &Path, options: &InstallOptions) -> Result<()> {
        self.post(
            "/appium/device/install_app",
            json!({
                "appPath": path.to_string_lossy(),
                "options": {
                    "replace": options.replace,
                    "allowTestPackages": options.allow_test_packages,
                    "grantPermissions": options.grant_permissions,
                }
            }),
        )
        .await?;
        Ok(())
    }

    async fn remove_app(&self, app_id: &str) -> Result<()> {
        self.post("/appium/device/remove_app", json!({ "appId": app_id }))
            .await?;
        Ok(())
    }

    async fn activate_app(&self, app_id: &str) -> Result<()> {
        self.post("/appium/device/activate_app", json!({ "appId": app_id }))
            .await?;
        Ok(())
    }

    async fn terminate_app(&self, app_id: &str) -> Result<()> {
        self.post("/appium/device/terminate_app", json!({ "appId": app_id }))
            .await?;
        Ok(())
    }

    async fn back(&self) -> Result<()> {
        self.post("/back", json!({})).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let response = self.get("/screenshot").await?;
        let encoded = response["value"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no screenshot data in response"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("failed to decode screenshot payload")
    }

    async fn window_size(&self) -> Result<(u32, u32)> {
        let response = self.get("/window/rect").await?;
        let width = response["value"]["width"].as_u64().unwrap_or(0) as u32;
        let height = response["value"]["height"].as_u64().unwrap_or(0) as u32;
        if width == 0 || height == 0 {
            anyhow::bail!("backend reported a zero-sized window");
        }
        Ok((width, height))
    }

    async fn swipe(&self, direction: SwipeDirection) -> Result<()> {
        let (width, height) = self.window_size().await?;
        // Gesture region: central area, away from system bars
        self.execute(
            "mobile: swipeGesture",
            json!({
                "left": width / 10,
                "top": height / 5,
                "width": width * 8 / 10,
                "height": height * 3 / 5,
                "direction": direction.as_str(),
                "percent": 0.75,
            }),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/session/{}", self.base_url, self.session_id))
            .send()
            .await
            .context("failed to delete session")?;
        Self::parse_response(resp).await?;
        Ok(())
    }
}
