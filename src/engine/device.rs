//! Device lifecycle management
//!
//! Guarantees exactly one addressable device reaches a verified READY
//! state before any automation session is opened. Boot verification is
//! layered: the boot-completed flag alone is not sufficient, since the
//! boot animation, the package service, and the home screen must also
//! be up before a session attach is reliable.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::bridge::{emulator, DeviceBridge, LinkState};
use crate::model::Platform;

use super::error::EngineError;
use super::events::EventEmitter;
use super::poll::{poll_until, sleep_cancellable, CancelToken, PollOutcome};
use super::DeviceSpec;

/// Total budget for a cold virtual-device launch
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(180);

/// Shared budget across all boot verification stages
const BOOT_TIMEOUT: Duration = Duration::from_secs(90);

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const BOOT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Settle time after the last boot check passes; services that just
/// came up still drop the first commands they receive.
const STABILIZATION: Duration = Duration::from_secs(2);

/// Readiness progression for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Discovering,
    Launching,
    Booting,
    Verifying,
    Ready,
    Failed,
}

pub struct DeviceLifecycleManager<'a> {
    bridge: &'a dyn DeviceBridge,
    emitter: &'a EventEmitter,
    cancel: &'a CancelToken,
    launch_timeout: Duration,
    boot_timeout: Duration,
    poll_interval: Duration,
    stabilization: Duration,
}

impl<'a> DeviceLifecycleManager<'a> {
    pub fn new(
        bridge: &'a dyn DeviceBridge,
        emitter: &'a EventEmitter,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            bridge,
            emitter,
            cancel,
            launch_timeout: LAUNCH_TIMEOUT,
            boot_timeout: BOOT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            stabilization: STABILIZATION,
        }
    }

    /// Shrink the time budgets (used by tests)
    pub fn with_timeouts(
        mut self,
        boot_timeout: Duration,
        poll_interval: Duration,
        stabilization: Duration,
    ) -> Self {
        self.boot_timeout = boot_timeout;
        self.poll_interval = poll_interval;
        self.stabilization = stabilization;
        self
    }

    /// Bring one device to the READY state and return its serial
    pub async fn ensure_ready(
        &self,
        platform: Platform,
        spec: &DeviceSpec,
        auto_launch: bool,
    ) -> Result<String, EngineError> {
        self.emitter.phase("discovering devices");
        let candidates = self
            .discover(platform, spec.selector.as_deref())
            .await?;

        let serial = match candidates.first() {
            Some(device) => device.serial.clone(),
            None => {
                if !auto_launch {
                    return Err(EngineError::DeviceDiscovery(
                        "no connected devices (auto-launch of a virtual device is disabled)"
                            .to_string(),
                    ));
                }
                self.emitter
                    .phase("no device connected, launching a virtual device");
                self.launch(spec.preferred_avd.as_deref()).await?
            }
        };

        self.emitter.phase(format!("using device {}", serial));
        self.verify_link(&serial).await?;
        self.await_boot(&serial).await?;
        self.emitter.phase(format!("device {} is ready", serial));
        Ok(serial)
    }

    /// List connected devices, applying the selector and a platform
    /// plausibility check on the serial format.
    async fn discover(
        &self,
        platform: Platform,
        selector: Option<&str>,
    ) -> Result<Vec<crate::bridge::Device>, EngineError> {
        let devices = self
            .bridge
            .devices()
            .await
            .map_err(|e| EngineError::DeviceDiscovery(format!("{:#}", e)))?;

        match selector {
            Some(wanted) => {
                let matched: Vec<_> = devices
                    .into_iter()
                    .filter(|d| d.serial == wanted)
                    .collect();
                if matched.is_empty() {
                    return Err(EngineError::DeviceDiscovery(format!(
                        "device '{}' is not connected",
                        wanted
                    )));
                }
                if !serial_matches_platform(wanted, platform) {
                    return Err(EngineError::DeviceDiscovery(format!(
                        "device '{}' does not look like {} hardware",
                        wanted,
                        platform.as_str()
                    )));
                }
                Ok(matched)
            }
            None => Ok(devices
                .into_iter()
                .filter(|d| serial_matches_platform(&d.serial, platform))
                .collect()),
        }
    }

    /// Start a virtual device and wait for it to come online
    async fn launch(&self, preferred_avd: Option<&str>) -> Result<String, EngineError> {
        let avds = emulator::list_avds()
            .await
            .map_err(|e| EngineError::DeviceDiscovery(format!("{:#}", e)))?;
        if avds.is_empty() {
            return Err(EngineError::DeviceDiscovery(
                "no virtual device profiles available; create one first".to_string(),
            ));
        }

        let avd = match preferred_avd {
            Some(name) => {
                if !avds.iter().any(|a| a == name) {
                    return Err(EngineError::DeviceDiscovery(format!(
                        "virtual device profile '{}' not found (available: {})",
                        name,
                        avds.join(", ")
                    )));
                }
                name.to_string()
            }
            None => avds[0].clone(),
        };

        self.emitter
            .phase(format!("launching virtual device '{}'", avd));
        emulator::launch_detached(&avd)
            .await
            .map_err(|e| EngineError::DeviceDiscovery(format!("{:#}", e)))?;

        let bridge = self.bridge;
        let outcome = poll_until(
            move || async move {
                bridge
                    .devices()
                    .await
                    .map(|list| {
                        list.iter()
                            .any(|d| d.is_emulator() && d.state == LinkState::Online)
                    })
                    .unwrap_or(false)
            },
            POLL_INTERVAL,
            self.launch_timeout,
            self.cancel,
        )
        .await;

        match outcome {
            PollOutcome::Satisfied => {
                let devices = self
                    .bridge
                    .devices()
                    .await
                    .map_err(|e| EngineError::DeviceDiscovery(format!("{:#}", e)))?;
                devices
                    .into_iter()
                    .find(|d| d.is_emulator() && d.state == LinkState::Online)
                    .map(|d| d.serial)
                    .ok_or_else(|| {
                        EngineError::DeviceDiscovery(
                            "virtual device went offline right after coming up".to_string(),
                        )
                    })
            }
            PollOutcome::TimedOut => Err(EngineError::DeviceLaunchTimeout {
                timeout_secs: self.launch_timeout.as_secs(),
            }),
            PollOutcome::Cancelled => Err(EngineError::Cancelled),
        }
    }

    /// Restart the bridge to clear cached link state
    ///
    /// The bridge can keep reporting `offline`/`unauthorized` for a
    /// device that is actually healthy; a server restart is the only
    /// reliable way to drop that cache.
    pub async fn reconcile_connection(&self) {
        self.emitter.phase("restarting device bridge");
        if let Err(e) = self.bridge.restart_server().await {
            log::warn!("bridge restart failed: {:#}", e);
        }
    }

    async fn link_state(&self, serial: &str) -> Result<LinkState, EngineError> {
        let devices = self
            .bridge
            .devices()
            .await
            .map_err(|e| EngineError::DeviceDiscovery(format!("{:#}", e)))?;
        Ok(devices
            .into_iter()
            .find(|d| d.serial == serial)
            .map(|d| d.state)
            .unwrap_or(LinkState::Offline))
    }

    /// Reconcile the bridge, then confirm the device link is usable.
    /// A second bad observation after reconciliation is fatal.
    async fn verify_link(&self, serial: &str) -> Result<(), EngineError> {
        self.reconcile_connection().await;
        if self.link_state(serial).await? == LinkState::Online {
            return Ok(());
        }

        self.emitter.warning(format!(
            "device {} link looks stale, restarting bridge once more",
            serial
        ));
        self.reconcile_connection().await;

        match self.link_state(serial).await? {
            LinkState::Online => Ok(()),
            LinkState::Unauthorized => Err(EngineError::DeviceUnauthorized {
                serial: serial.to_string(),
            }),
            LinkState::Offline => Err(EngineError::DeviceOffline {
                serial: serial.to_string(),
            }),
            LinkState::Other(state) => Err(EngineError::DeviceDiscovery(format!(
                "device {} is in unexpected state '{}'",
                serial, state
            ))),
        }
    }

    /// Run the boot verification stages under one shared budget
    pub async fn await_boot(&self, serial: &str) -> Result<(), EngineError> {
        let start = Instant::now();
        let bridge = self.bridge;

        self.emitter
            .phase(format!("waiting for device {} to finish booting", serial));

        self.boot_stage(serial, start, "boot completed flag", {
            let serial = serial.to_string();
            move || {
                let serial = serial.clone();
                async move {
                    bridge
                        .getprop(&serial, "sys.boot_completed")
                        .await
                        .map(|v| v == "1")
                        .unwrap_or(false)
                }
            }
        })
        .await?;

        self.boot_stage(serial, start, "boot animation stopped", {
            let serial = serial.to_string();
            move || {
                let serial = serial.clone();
                async move {
                    bridge
                        .getprop(&serial, "init.svc.bootanim")
                        .await
                        .map(|v| v == "stopped")
                        .unwrap_or(false)
                }
            }
        })
        .await?;

        self.boot_stage(serial, start, "package service responding", {
            let serial = serial.to_string();
            move || {
                let serial = serial.clone();
                async move {
                    bridge
                        .shell(&serial, "pm list packages")
                        .await
                        .map(|out| out.contains("package:"))
                        .unwrap_or(false)
                }
            }
        })
        .await?;

        self.boot_stage(serial, start, "home screen available", {
            let serial = serial.to_string();
            move || {
                let serial = serial.clone();
                async move {
                    bridge
                        .shell(
                            &serial,
                            "cmd package resolve-activity --brief -c android.intent.category.HOME",
                        )
                        .await
                        .map(|out| out.lines().any(|l| l.contains('/')))
                        .unwrap_or(false)
                }
            }
        })
        .await?;

        if !sleep_cancellable(self.stabilization, self.cancel).await {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    async fn boot_stage<F, Fut>(
        &self,
        serial: &str,
        start: Instant,
        stage: &str,
        probe: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let remaining = self.boot_timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(self.boot_timeout_error(serial, stage));
        }

        let mut probe = probe;
        let mut last_log = Instant::now();
        let stage_name = stage.to_string();
        let wrapped = move || {
            if last_log.elapsed() >= BOOT_LOG_INTERVAL {
                last_log = Instant::now();
                log::info!(
                    "still waiting for {} ({}s elapsed)",
                    stage_name,
                    start.elapsed().as_secs()
                );
            }
            probe()
        };

        match poll_until(wrapped, self.poll_interval, remaining, self.cancel).await {
            PollOutcome::Satisfied => Ok(()),
            PollOutcome::TimedOut => Err(self.boot_timeout_error(serial, stage)),
            PollOutcome::Cancelled => Err(EngineError::Cancelled),
        }
    }

    fn boot_timeout_error(&self, serial: &str, stage: &str) -> EngineError {
        EngineError::DeviceBootTimeout {
            serial: serial.to_string(),
            timeout_secs: self.boot_timeout.as_secs(),
            stage: stage.to_string(),
        }
    }
}

/// Serial-format plausibility check: simulator/real-device UDIDs are
/// UUID shaped, bridge serials are not.
fn serial_matches_platform(serial: &str, platform: Platform) -> bool {
    let uuid_like = serial.len() == 36
        && serial
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-');
    match platform {
        Platform::Ios => uuid_like,
        Platform::Android => !uuid_like,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Device;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBridge {
        /// Script of `devices()` results; the last entry repeats
        device_lists: Mutex<VecDeque<Vec<Device>>>,
        props: Mutex<HashMap<String, String>>,
        shells: Mutex<HashMap<String, String>>,
        restarts: AtomicUsize,
    }

    impl FakeBridge {
        fn with_devices(self, lists: Vec<Vec<(&str, LinkState)>>) -> Self {
            *self.device_lists.lock().unwrap() = lists
                .into_iter()
                .map(|list| {
                    list.into_iter()
                        .map(|(serial, state)| Device {
                            serial: serial.to_string(),
                            state,
                        })
                        .collect()
                })
                .collect();
            self
        }

        fn with_prop(self, name: &str, value: &str) -> Self {
            self.props
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            self
        }

        fn with_shell(self, cmd: &str, out: &str) -> Self {
            self.shells
                .lock()
                .unwrap()
                .insert(cmd.to_string(), out.to_string());
            self
        }

        fn booted(self) -> Self {
            self.with_prop("sys.boot_completed", "1")
                .with_prop("init.svc.bootanim", "stopped")
                .with_shell("pm list packages", "package:com.android.settings")
                .with_shell(
                    "cmd package resolve-activity --brief -c android.intent.category.HOME",
                    "com.example.launcher/.LauncherActivity",
                )
        }
    }

    #[async_trait]
    impl DeviceBridge for FakeBridge {
        async fn devices(&self) -> Result<Vec<Device>> {
            let mut lists = self.device_lists.lock().unwrap();
            if lists.len() > 1 {
                Ok(lists.pop_front().unwrap())
            } else {
                Ok(lists.front().cloned().unwrap_or_default())
            }
        }

        async fn shell(&self, _serial: &str, cmd: &str) -> Result<String> {
            Ok(self
                .shells
                .lock()
                .unwrap()
                .get(cmd)
                .cloned()
                .unwrap_or_default())
        }

        async fn getprop(&self, _serial: &str, prop: &str) -> Result<String> {
            Ok(self
                .props
                .lock()
                .unwrap()
                .get(prop)
                .cloned()
                .unwrap_or_default())
        }

        async fn restart_server(&self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager<'a>(
        bridge: &'a FakeBridge,
        emitter: &'a EventEmitter,
        cancel: &'a CancelToken,
    ) -> DeviceLifecycleManager<'a> {
        DeviceLifecycleManager::new(bridge, emitter, cancel).with_timeouts(
            Duration::from_millis(100),
            Duration::from_millis(10),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_ensure_ready_happy_path() {
        let bridge = FakeBridge::default()
            .with_devices(vec![vec![("emulator-5554", LinkState::Online)]])
            .booted();
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let serial = manager(&bridge, &emitter, &cancel)
            .ensure_ready(Platform::Android, &DeviceSpec::default(), false)
            .await
            .unwrap();
        assert_eq!(serial, "emulator-5554");
        // Reconciliation ran exactly once on the happy path
        assert_eq!(bridge.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_boot_timeout_never_hangs() {
        let bridge = FakeBridge::default()
            .with_devices(vec![vec![("emulator-5554", LinkState::Online)]])
            .with_prop("sys.boot_completed", "0");
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let start = Instant::now();
        let err = manager(&bridge, &emitter, &cancel)
            .await_boot("emulator-5554")
            .await
            .unwrap_err();

        match err {
            EngineError::DeviceBootTimeout { stage, .. } => {
                assert_eq!(stage, "boot completed flag");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_boot_timeout_reports_stuck_stage() {
        // Boot flag and animation pass, package service never answers
        let bridge = FakeBridge::default()
            .with_devices(vec![vec![("emulator-5554", LinkState::Online)]])
            .with_prop("sys.boot_completed", "1")
            .with_prop("init.svc.bootanim", "stopped");
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let err = manager(&bridge, &emitter, &cancel)
            .await_boot("emulator-5554")
            .await
            .unwrap_err();
        match err {
            EngineError::DeviceBootTimeout { stage, .. } => {
                assert_eq!(stage, "package service responding");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_persistent_unauthorized_is_fatal_after_one_retry() {
        let bridge = FakeBridge::default()
            .with_devices(vec![vec![("R58M1", LinkState::Unauthorized)]])
            .booted();
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let err = manager(&bridge, &emitter, &cancel)
            .ensure_ready(
                Platform::Android,
                &DeviceSpec {
                    selector: Some("R58M1".to_string()),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DeviceUnauthorized { .. }));
        assert_eq!(bridge.restarts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_recovers_after_reconciliation() {
        let bridge = FakeBridge::default()
            .with_devices(vec![
                vec![("R58M1", LinkState::Unauthorized)],
                vec![("R58M1", LinkState::Unauthorized)],
                vec![("R58M1", LinkState::Online)],
            ])
            .booted();
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let serial = manager(&bridge, &emitter, &cancel)
            .ensure_ready(
                Platform::Android,
                &DeviceSpec {
                    selector: Some("R58M1".to_string()),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(serial, "R58M1");
    }

    #[tokio::test]
    async fn test_discovery_fails_for_missing_selector() {
        let bridge =
            FakeBridge::default().with_devices(vec![vec![("emulator-5554", LinkState::Online)]]);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let err = manager(&bridge, &emitter, &cancel)
            .ensure_ready(
                Platform::Android,
                &DeviceSpec {
                    selector: Some("nonexistent".to_string()),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DeviceDiscovery(_)));
    }

    #[tokio::test]
    async fn test_platform_mismatch_rejected() {
        let udid = "01234567-89ab-cdef-0123-456789abcdef";
        let bridge = FakeBridge::default().with_devices(vec![vec![(udid, LinkState::Online)]]);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let err = manager(&bridge, &emitter, &cancel)
            .ensure_ready(
                Platform::Android,
                &DeviceSpec {
                    selector: Some(udid.to_string()),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DeviceDiscovery(_)));
    }

    #[test]
    fn test_serial_platform_heuristic() {
        assert!(serial_matches_platform("emulator-5554", Platform::Android));
        assert!(serial_matches_platform(
            "01234567-89ab-cdef-0123-456789abcdef",
            Platform::Ios
        ));
        assert!(!serial_matches_platform("emulator-5554", Platform::Ios));
    }
}
