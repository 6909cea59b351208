//! Container driver: a narrow adapter over an external container engine.
//!
//! [`ContainerDriver`] is the seam between the pool manager and whatever
//! actually runs containers, so the manager's pool logic can be exercised
//! against [`mock::MockDriver`] without a live engine.

pub mod docker;
pub mod frame;
pub mod mock;

use async_trait::async_trait;

use crate::config::ResourceLimitsConfig;
use crate::error::Result;

/// Opaque handle to a running container, issued by the driver that created it.
pub type ContainerRef = String;

/// Parameters needed to create a new sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub id: String,
    pub image: String,
    pub limits: ResourceLimitsConfig,
    /// Host path bind-mounted read-only at `/app/semantic`.
    pub semantic_mount_host_path: String,
}

/// Outcome of running a command inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Thin semantic wrapper over the container engine's control API.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pulls `image` if it is not already present locally.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Creates (but does not start) a container per `spec`. Returns its ref.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef>;

    async fn start_container(&self, container: &ContainerRef) -> Result<()>;

    /// Requests graceful stop; already-stopped is treated as success.
    async fn stop_container(&self, container: &ContainerRef, grace_secs: i64) -> Result<()>;

    /// Force-removes; already-gone is treated as success.
    async fn remove_container(&self, container: &ContainerRef) -> Result<()>;

    /// Runs `cmd` under `/bin/bash -lc`, optionally bounded by `timeout_ms`.
    async fn exec_in_container(
        &self,
        container: &ContainerRef,
        cmd: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ExecResult>;

    /// Writes `bytes` to `path` inside the container. `path` must match
    /// `^[A-Za-z0-9/_.-]+$`.
    async fn write_to_container(
        &self,
        container: &ContainerRef,
        path: &str,
        bytes: &[u8],
    ) -> Result<()>;

    async fn is_container_running(&self, container: &ContainerRef) -> bool;

    /// Installs the Python data-analysis stack, skipping the install if
    /// `python3 --version` already succeeds.
    async fn init_container_python(&self, container: &ContainerRef, timeout_ms: u64)
        -> Result<()>;
}
