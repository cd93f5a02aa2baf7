//! Container runtime driven through its CLI

use crate::error::ProcessError;
use crate::process::{Invocation, ProcessRunner};
use std::path::PathBuf;
use tracing::{debug, info};

/// Everything needed to start one detached container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    pub network: Option<String>,
    /// Bare labels; a Run Tag is attached this way
    pub labels: Vec<String>,
    /// `(host, container)` port pairs
    pub ports: Vec<(u16, u16)>,
    /// `(host path, container path)` bind mounts
    pub volumes: Vec<(PathBuf, String)>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn publish(mut self, host: u16, container: u16) -> Self {
        self.ports.push((host, container));
        self
    }

    pub fn volume(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.volumes.push((host.into(), container.into()));
        self
    }

    /// Arguments after the runtime binary: `run --rm -d ... <image>`
    pub fn run_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into(), "--rm".into(), "-d".into()];
        args.push("--name".into());
        args.push(self.name.clone());
        if let Some(hostname) = &self.hostname {
            args.push("--hostname".into());
            args.push(hostname.clone());
        }
        if let Some(network) = &self.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        for (host, container) in &self.ports {
            args.push("-p".into());
            args.push(format!("{}:{}", host, container));
        }
        for label in &self.labels {
            args.push("-l".into());
            args.push(label.clone());
        }
        for (host, container) in &self.volumes {
            args.push("-v".into());
            args.push(format!("{}:{}", host.display(), container));
        }
        args.push(self.image.clone());
        args
    }
}

/// Thin wrapper over the `docker` (or compatible) CLI
pub struct DockerCli<'a> {
    runner: &'a dyn ProcessRunner,
    program: String,
}

impl<'a> DockerCli<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.program)
    }

    /// Start a detached container and return its id
    pub async fn run_detached(&self, spec: &ContainerSpec) -> Result<String, ProcessError> {
        let stdout = self.runner.run(&self.command().args(spec.run_args())).await?;
        let id = String::from_utf8_lossy(&stdout).trim().to_string();
        info!(name = %spec.name, image = %spec.image, container_id = %id, "Started container");
        Ok(id)
    }

    /// Ids of running containers carrying `label`
    pub async fn containers_with_label(&self, label: &str) -> Result<Vec<String>, ProcessError> {
        let stdout = self
            .runner
            .run(&self.command().args(["ps", "--filter"]).arg(format!("label={}", label)).arg("-q"))
            .await?;
        Ok(String::from_utf8_lossy(&stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Stop every container carrying `label`; returns how many were stopped
    pub async fn stop_by_label(&self, label: &str) -> Result<usize, ProcessError> {
        let ids = self.containers_with_label(label).await?;
        if ids.is_empty() {
            debug!(label, "No containers to stop");
            return Ok(0);
        }

        self.runner
            .run(&self.command().arg("stop").args(ids.iter().cloned()))
            .await?;
        info!(label, count = ids.len(), "Stopped containers");
        Ok(ids.len())
    }

    pub async fn create_network(&self, name: &str) -> Result<(), ProcessError> {
        self.runner
            .run(&self.command().args(["network", "create", name]))
            .await?;
        info!(network = name, "Created network");
        Ok(())
    }

    pub async fn remove_network(&self, name: &str) -> Result<(), ProcessError> {
        self.runner
            .run(&self.command().args(["network", "remove", name]))
            .await?;
        info!(network = name, "Removed network");
        Ok(())
    }
}
