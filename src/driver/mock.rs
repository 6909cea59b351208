//! Deterministic in-memory [`ContainerDriver`] used by pool-manager tests.
//!
//! Mirrors the hand-rolled test fakes in the worker-pool test module: no
//! real container engine, just enough scripted behavior to drive the
//! manager's state machine and timers deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};

use super::{ContainerDriver, ContainerRef, ContainerSpec, ExecResult};
use crate::error::{Result, SandboxError};

/// Canned behavior for a single mock container.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Exit code / stdout returned by `python3 -c 'print(1)'` health probes.
    pub health_probe_exit_code: i64,
    /// If set, every exec sleeps this long before returning (used to
    /// exercise the timeout path).
    pub exec_delay_ms: Option<u64>,
    /// If true, `create_container` fails.
    pub fail_create: bool,
    /// If true, `init_container_python` fails.
    pub fail_init: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            health_probe_exit_code: 0,
            exec_delay_ms: None,
            fail_create: false,
            fail_init: false,
        }
    }
}

struct MockState {
    running: HashMap<ContainerRef, bool>,
    behaviors: HashMap<ContainerRef, MockBehavior>,
    default_behavior: MockBehavior,
}

/// In-memory container driver. Scripted per-container via
/// [`MockDriver::set_behavior`]; unconfigured containers use
/// `default_behavior`.
pub struct MockDriver {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    exec_count: AtomicU64,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                running: HashMap::new(),
                behaviors: HashMap::new(),
                default_behavior: MockBehavior::default(),
            }),
            next_id: AtomicU64::new(0),
            exec_count: AtomicU64::new(0),
        }
    }

    pub async fn set_behavior(&self, container: &ContainerRef, behavior: MockBehavior) {
        let mut state = self.state.lock().await;
        state.behaviors.insert(container.clone(), behavior);
    }

    pub async fn set_default_behavior(&self, behavior: MockBehavior) {
        let mut state = self.state.lock().await;
        state.default_behavior = behavior;
    }

    pub fn exec_count(&self) -> u64 {
        self.exec_count.load(Ordering::SeqCst)
    }

    async fn behavior_for(&self, container: &ContainerRef) -> MockBehavior {
        let state = self.state.lock().await;
        state
            .behaviors
            .get(container)
            .cloned()
            .unwrap_or_else(|| state.default_behavior.clone())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContainerDriver for MockDriver {
    async fn ensure_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef> {
        let behavior = {
            let state = self.state.lock().await;
            state.default_behavior.clone()
        };
        if behavior.fail_create {
            return Err(SandboxError::SandboxUnavailable(
                "mock configured to fail create".to_string(),
            ));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let container_ref = format!("mock-{}-{n}", spec.id);
        let mut state = self.state.lock().await;
        state.running.insert(container_ref.clone(), false);
        Ok(container_ref)
    }

    async fn start_container(&self, container: &ContainerRef) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.insert(container.clone(), true);
        Ok(())
    }

    async fn stop_container(&self, container: &ContainerRef, _grace_secs: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.insert(container.clone(), false);
        Ok(())
    }

    async fn remove_container(&self, container: &ContainerRef) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.remove(container);
        state.behaviors.remove(container);
        Ok(())
    }

    async fn exec_in_container(
        &self,
        container: &ContainerRef,
        cmd: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ExecResult> {
        self.exec_count.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior_for(container).await;

        let run = async {
            if let Some(delay) = behavior.exec_delay_ms {
                sleep(Duration::from_millis(delay)).await;
            }

            if cmd.contains("print(1)") {
                return ExecResult {
                    stdout: if behavior.health_probe_exit_code == 0 {
                        "1".to_string()
                    } else {
                        String::new()
                    },
                    stderr: String::new(),
                    exit_code: behavior.health_probe_exit_code,
                };
            }

            ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            }
        };

        match timeout_ms {
            Some(ms) => timeout(Duration::from_millis(ms), run).await.map_err(|_| {
                SandboxError::SandboxTimeout {
                    operation: "exec".to_string(),
                    timeout_ms: ms,
                }
            }),
            None => Ok(run.await),
        }
    }

    async fn write_to_container(
        &self,
        _container: &ContainerRef,
        _path: &str,
        _bytes: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    async fn is_container_running(&self, container: &ContainerRef) -> bool {
        let state = self.state.lock().await;
        state.running.get(container).copied().unwrap_or(false)
    }

    async fn init_container_python(
        &self,
        container: &ContainerRef,
        _timeout_ms: u64,
    ) -> Result<()> {
        let behavior = self.behavior_for(container).await;
        if behavior.fail_init {
            return Err(SandboxError::PythonSetupFailed(
                "mock configured to fail init".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimitsConfig;

    fn spec(id: &str) -> ContainerSpec {
        ContainerSpec {
            id: id.to_string(),
            image: "ubuntu:22.04".to_string(),
            limits: ResourceLimitsConfig::default(),
            semantic_mount_host_path: "/tmp/semantic".to_string(),
        }
    }

    #[tokio::test]
    async fn create_start_stop_remove_round_trip() {
        let driver = MockDriver::new();
        let container = driver.create_container(&spec("a")).await.unwrap();
        assert!(!driver.is_container_running(&container).await);
        driver.start_container(&container).await.unwrap();
        assert!(driver.is_container_running(&container).await);
        driver.stop_container(&container, 5).await.unwrap();
        assert!(!driver.is_container_running(&container).await);
        driver.remove_container(&container).await.unwrap();
    }

    #[tokio::test]
    async fn exec_times_out_when_delay_exceeds_budget() {
        let driver = MockDriver::new();
        let container = driver.create_container(&spec("b")).await.unwrap();
        driver
            .set_behavior(
                &container,
                MockBehavior {
                    exec_delay_ms: Some(200),
                    ..Default::default()
                },
            )
            .await;
        let err = driver
            .exec_in_container(&container, "sleep 1", Some(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::SandboxTimeout { .. }));
    }

    #[tokio::test]
    async fn health_probe_reports_configured_failures() {
        let driver = MockDriver::new();
        let container = driver.create_container(&spec("c")).await.unwrap();
        driver
            .set_behavior(
                &container,
                MockBehavior {
                    health_probe_exit_code: 1,
                    ..Default::default()
                },
            )
            .await;
        let result = driver
            .exec_in_container(&container, "python3 -c 'print(1)'", Some(5_000))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
    }
}
