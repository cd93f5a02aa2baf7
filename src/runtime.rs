//! Starting and stopping a batch of proxy and backend containers
//!
//! Each batch gets a random [`RunTag`]. The tag labels every container of
//! the batch and names its private network, so the whole batch can later be
//! found and stopped from the tag alone. Nothing about a batch is persisted:
//! if cleat dies midway the containers can only be found by their label.

use crate::config::RuntimeSettings;
use crate::docker::{ContainerSpec, DockerCli};
use crate::layout::{OutputTree, CONTAINER_CERT_ROOT, CONTAINER_CONF_DIR};
use crate::manifest::Manifest;
use crate::process::ProcessRunner;
use anyhow::{Context, Result};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

const RUN_TAG_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RUN_TAG_LEN: usize = 8;

/// Random label identifying one batch of containers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunTag(String);

impl RunTag {
    /// Draw a fresh tag from `rng`
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let tag = (0..RUN_TAG_LEN)
            .map(|_| RUN_TAG_ALPHABET[rng.gen_range(0..RUN_TAG_ALPHABET.len())] as char)
            .collect();
        RunTag(tag)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != RUN_TAG_LEN || !s.bytes().all(|b| RUN_TAG_ALPHABET.contains(&b)) {
            return Err(format!(
                "invalid run tag '{}': expected {} characters from [a-z0-9]",
                s, RUN_TAG_LEN
            ));
        }
        Ok(RunTag(s.to_string()))
    }
}

/// Starts and stops container batches for a manifest
pub struct RuntimeController<'a> {
    docker: DockerCli<'a>,
    settings: RuntimeSettings,
}

impl<'a> RuntimeController<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, settings: RuntimeSettings) -> Self {
        Self {
            docker: DockerCli::new(runner, settings.docker.clone()),
            settings,
        }
    }

    fn network_name(&self, tag: &RunTag) -> String {
        format!("{}{}", self.settings.network_prefix, tag)
    }

    /// Start one container per manifest entry plus the proxy, all on a
    /// fresh network labelled with a new Run Tag
    pub async fn start_all<R: Rng + ?Sized>(
        &self,
        manifest: &Manifest,
        tree: &OutputTree,
        rng: &mut R,
    ) -> Result<RunTag> {
        let tag = RunTag::generate(rng);
        let network = self.network_name(&tag);

        self.docker
            .create_network(&network)
            .await
            .with_context(|| format!("Failed to create network '{}'", network))?;

        let result = self.start_containers(manifest, tree, &tag, &network).await;
        if let Err(e) = &result {
            error!(run_tag = %tag, error = %e, "Batch start failed; containers already started keep running");
        }
        result?;

        info!(run_tag = %tag, backends = manifest.len(), "Services running");
        Ok(tag)
    }

    async fn start_containers(
        &self,
        manifest: &Manifest,
        tree: &OutputTree,
        tag: &RunTag,
        network: &str,
    ) -> Result<()> {
        for entry in manifest.entries() {
            let name = entry.hostname(&self.settings.hostname_prefix);
            let spec = ContainerSpec::new(&name, &entry.service.image)
                .hostname(&name)
                .network(network)
                .label(tag.as_str());
            self.docker
                .run_detached(&spec)
                .await
                .with_context(|| format!("Failed to start backend for '{}'", entry.url))?;
        }

        let proxy = ContainerSpec::new(&self.settings.proxy_name, &self.settings.proxy_image)
            .network(network)
            .publish(80, 80)
            .publish(443, 443)
            .label(tag.as_str())
            .volume(tree.https_dir(), CONTAINER_CERT_ROOT)
            .volume(tree.proxy_conf_dir(), CONTAINER_CONF_DIR);
        self.docker
            .run_detached(&proxy)
            .await
            .context("Failed to start proxy container")?;

        Ok(())
    }

    /// Stop every container labelled `tag` and remove the batch network
    ///
    /// An unknown tag matches nothing and is not an error.
    pub async fn stop_all(&self, tag: &RunTag) -> Result<usize> {
        let stopped = self
            .docker
            .stop_by_label(tag.as_str())
            .await
            .with_context(|| format!("Failed to stop containers labelled '{}'", tag))?;

        let network = self.network_name(tag);
        if let Err(e) = self.docker.remove_network(&network).await {
            warn!(network = %network, error = %e, "Could not remove network");
        }

        info!(run_tag = %tag, stopped, "Batch stopped");
        Ok(stopped)
    }
}
