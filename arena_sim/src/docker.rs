//! Container runtime backed by the docker CLI.

use arena_env::{ContainerRuntime, Endpoint, EnvError, JsonTransport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Port agents listen on inside their container.
pub const CONTAINER_PORT: u16 = 10080;

/// Starts agent images with `docker run` and removes them with `docker rm -f`.
///
/// A container counts as started once `GET /ping` on its published port
/// succeeds. Containers still registered when the runtime is dropped are
/// removed synchronously.
pub struct DockerRuntime {
    /// Used for the readiness probe
    transport: Arc<dyn JsonTransport>,

    /// Docker executable
    binary: String,

    /// Scheme and host the published ports are reachable on
    host: String,

    /// Give up on a container that is not ready after this long
    startup_timeout: Duration,

    /// Delay between readiness probes
    poll_interval: Duration,

    /// Ids of running containers
    started: Mutex<Vec<String>>,
}

impl DockerRuntime {
    pub fn new(transport: Arc<dyn JsonTransport>) -> Self {
        Self {
            transport,
            binary: "docker".to_string(),
            host: "http://localhost".to_string(),
            startup_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.startup_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Ids of the containers currently owned by this runtime.
    pub fn container_ids(&self) -> Vec<String> {
        self.started().clone()
    }

    fn started(&self) -> MutexGuard<'_, Vec<String>> {
        self.started.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Arguments of the `docker run` invocation.
    pub fn run_args(image: &str, port: u16, env: &BTreeMap<String, String>) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "-p".to_string(),
            format!("{}:{}", port, CONTAINER_PORT),
        ];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.to_string());
        args
    }

    async fn wait_ready(&self, endpoint: &Endpoint) -> Result<(), EnvError> {
        let url = endpoint.url("ping");
        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        loop {
            match self.transport.probe(&url, self.poll_interval).await {
                Ok(()) => return Ok(()),
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    return Err(EnvError::container(format!(
                        "{} not ready after {:?}: {}",
                        endpoint, self.startup_timeout, e
                    )))
                }
                Err(e) => debug!("Waiting for {}: {}", endpoint, e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn remove(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let result = Command::new(&self.binary)
            .args(["rm", "-f"])
            .args(ids)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => info!("Removed {} container(s)", ids.len()),
            Ok(status) => warn!("docker rm exited with {}", status),
            Err(e) => warn!("docker rm failed: {}", e),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(
        &self,
        image: &str,
        port: u16,
        env: &BTreeMap<String, String>,
    ) -> Result<Endpoint, EnvError> {
        let output = Command::new(&self.binary)
            .args(Self::run_args(image, port, env))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EnvError::container(format!("failed to launch {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(EnvError::container(format!(
                "docker run {} failed: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Started container {} from {} on port {}", id, image, port);
        self.started().push(id.clone());

        let endpoint = Endpoint::new(self.host.clone(), port);
        if let Err(e) = self.wait_ready(&endpoint).await {
            self.started().retain(|c| c != &id);
            self.remove(&[id]).await;
            return Err(e);
        }
        Ok(endpoint)
    }

    async fn stop_all(&self) {
        let ids = std::mem::take(&mut *self.started());
        self.remove(&ids).await;
    }
}

impl Drop for DockerRuntime {
    fn drop(&mut self) {
        let ids = std::mem::take(&mut *self.started());
        if ids.is_empty() {
            return;
        }
        warn!("Removing {} container(s) left running", ids.len());
        let _ = std::process::Command::new(&self.binary)
            .args(["rm", "-f"])
            .args(&ids)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
