//! Production [`ContainerDriver`] backed by the local container engine's
//! control socket, via the bollard client.

use base64::Engine;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{ContainerDriver, ContainerRef, ContainerSpec, ExecResult};
use crate::error::{Result, SandboxError};

static SAFE_PATH: OnceLock<Regex> = OnceLock::new();

fn safe_path_regex() -> &'static Regex {
    SAFE_PATH.get_or_init(|| Regex::new(r"^[A-Za-z0-9/_.\-]+$").unwrap())
}

const CPU_PERIOD: i64 = 100_000;

/// [`ContainerDriver`] implementation wrapping `bollard::Docker`.
pub struct BollardDriver {
    docker: Docker,
}

impl BollardDriver {
    /// Connects to the local Docker daemon using its default socket.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pings the daemon; used by the manager at `initialize()`.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn check_safe_path(path: &str) -> Result<()> {
    if safe_path_regex().is_match(path) {
        Ok(())
    } else {
        Err(SandboxError::UnsafePath(path.to_string()))
    }
}

#[async_trait::async_trait]
impl ContainerDriver for BollardDriver {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef> {
        let name = format!("sandbox-{}", spec.id);

        let host_config = HostConfig {
            memory: Some(spec.limits.memory_bytes as i64),
            cpu_period: Some(CPU_PERIOD),
            cpu_quota: Some((spec.limits.nano_cpus as i64 * CPU_PERIOD) / 1_000_000_000),
            pids_limit: Some(spec.limits.pids_limit),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            tmpfs: Some(
                [(
                    "/tmp".to_string(),
                    "rw,noexec,nosuid,size=64m".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            binds: Some(vec![format!(
                "{}:/app/semantic:ro",
                spec.semantic_mount_host_path
            )]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some("/app".to_string()),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await?;

        debug!(container_id = %response.id, %name, "created sandbox container");
        Ok(response.id)
    }

    async fn start_container(&self, container: &ContainerRef) -> Result<()> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container: &ContainerRef, grace_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: grace_secs };
        match self.docker.stop_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("No such container") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, container: &ContainerRef) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("No such container") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exec_in_container(
        &self,
        container: &ContainerRef,
        cmd: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ExecResult> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec![
                "/bin/bash".to_string(),
                "-lc".to_string(),
                cmd.to_string(),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container, exec_options).await?;

        let run = async {
            let start_result = self.docker.start_exec(&exec.id, None).await?;

            let mut stdout = String::new();
            let mut stderr = String::new();

            if let StartExecResults::Attached { mut output, .. } = start_result {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }

            let exec_info = self.docker.inspect_exec(&exec.id).await?;
            let exit_code = exec_info.exit_code.unwrap_or(-1);

            Ok::<ExecResult, bollard::errors::Error>(ExecResult {
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
                exit_code,
            })
        };

        match timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms), run).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(SandboxError::SandboxTimeout {
                    operation: "exec".to_string(),
                    timeout_ms: ms,
                }),
            },
            None => Ok(run.await?),
        }
    }

    async fn write_to_container(
        &self,
        container: &ContainerRef,
        path: &str,
        bytes: &[u8],
    ) -> Result<()> {
        check_safe_path(path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let cmd = format!("echo {encoded} | base64 -d > {path}");
        let result = self.exec_in_container(container, &cmd, None).await?;
        if result.exit_code != 0 {
            warn!(%path, exit_code = result.exit_code, "write_to_container non-zero exit");
        }
        Ok(())
    }

    async fn is_container_running(&self, container: &ContainerRef) -> bool {
        match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn init_container_python(
        &self,
        container: &ContainerRef,
        timeout_ms: u64,
    ) -> Result<()> {
        let probe = self
            .exec_in_container(container, "python3 --version", Some(5_000))
            .await;
        if matches!(&probe, Ok(r) if r.exit_code == 0) {
            return Ok(());
        }

        let install_cmd = "apt-get update -qq && apt-get install -y -qq python3-pip python3-dev \
             && pip3 install --quiet pandas numpy scipy";

        let result = self
            .exec_in_container(container, install_cmd, Some(timeout_ms))
            .await?;

        if result.exit_code != 0 {
            return Err(SandboxError::PythonSetupFailed(result.stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_path_accepts_ordinary_paths() {
        assert!(check_safe_path("/tmp/mongodb_result.json").is_ok());
        assert!(check_safe_path("/app/semantic/schema.yaml").is_ok());
    }

    #[test]
    fn safe_path_rejects_shell_metacharacters() {
        assert!(check_safe_path("/tmp/a; rm -rf /").is_err());
        assert!(check_safe_path("/tmp/a$(whoami)").is_err());
        assert!(check_safe_path("/tmp/has space").is_err());
    }
}
