//! HTTPS material bootstrap and certificate renewal
//!
//! Bootstrap creates the long-lived material once: an account key,
//! Diffie-Hellman parameters, one key and CSR per domain, and a cached copy
//! of the issuer cross-sign certificate.
//!
//! Renewal is a short state machine:
//!
//! ```text
//! Idle -> TempProxyRunning -> (sign domain)* -> TempProxyStopped
//! ```
//!
//! A temporary port 80 proxy serves `/.well-known/` from the HTTPS material
//! directory while the external signer is invoked for each domain. A domain
//! whose signing fails does not stop the others, and the temporary proxy is
//! always stopped exactly once at the end of the run.

use crate::config::{AcmeSettings, RuntimeSettings};
use crate::docker::{ContainerSpec, DockerCli};
use crate::layout::{self, OutputTree, CONTAINER_CHALLENGE_ROOT, CONTAINER_CONF_DIR};
use crate::manifest::Manifest;
use crate::process::{Invocation, ProcessRunner};
use crate::runtime::RunTag;
use crate::sites;
use anyhow::{Context, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Phases of a renewal run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalState {
    Idle,
    TempProxyRunning,
    Signing,
    TempProxyStopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Regenerate domain keys and CSRs even when a key already exists
    pub force: bool,
}

/// What a bootstrap run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub account_key_generated: bool,
    pub dhparam_generated: bool,
    /// Domains that got a new key and CSR
    pub keys_generated: Vec<String>,
    /// Domains whose existing key was kept; a missing CSR is still created
    pub keys_kept: Vec<String>,
    pub cross_sign_fetched: bool,
}

/// Result of signing one domain
#[derive(Debug)]
pub struct DomainOutcome {
    pub domain: String,
    /// Path of the chained certificate, or why it was not produced
    pub result: std::result::Result<PathBuf, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStatus {
    /// Every domain got a new certificate
    Completed,
    /// At least one step failed; teardown still ran
    StoppedWithErrors,
}

/// What a renewal run did
#[derive(Debug)]
pub struct RenewalReport {
    pub run_tag: RunTag,
    pub outcomes: Vec<DomainOutcome>,
    /// Set when the temporary proxy could not be started
    pub proxy_error: Option<String>,
    /// Set when the temporary proxy could not be stopped
    pub teardown_error: Option<String>,
    pub final_state: RenewalState,
}

impl RenewalReport {
    pub fn status(&self) -> RenewalStatus {
        if self.proxy_error.is_none()
            && self.teardown_error.is_none()
            && self.outcomes.iter().all(|o| o.result.is_ok())
        {
            RenewalStatus::Completed
        } else {
            RenewalStatus::StoppedWithErrors
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(e) => Some((o.domain.as_str(), e.as_str())),
        })
    }

    /// Turn a run with errors into a single error listing them
    pub fn into_result(self) -> Result<Self> {
        if self.status() == RenewalStatus::Completed {
            return Ok(self);
        }

        let mut problems: Vec<String> = Vec::new();
        if let Some(e) = &self.proxy_error {
            problems.push(format!("temporary proxy: {}", e));
        }
        problems.extend(self.failures().map(|(domain, e)| format!("{}: {}", domain, e)));
        if let Some(e) = &self.teardown_error {
            problems.push(format!("teardown: {}", e));
        }
        anyhow::bail!(
            "Renewal {} finished with errors:\n  - {}",
            self.run_tag,
            problems.join("\n  - ")
        )
    }
}

/// Drives openssl, the signer and the temporary proxy for one output tree
pub struct AcmeOrchestrator<'a> {
    runner: &'a dyn ProcessRunner,
    tree: OutputTree,
    acme: AcmeSettings,
    runtime: RuntimeSettings,
}

impl<'a> AcmeOrchestrator<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        tree: OutputTree,
        acme: AcmeSettings,
        runtime: RuntimeSettings,
    ) -> Self {
        Self {
            runner,
            tree,
            acme,
            runtime,
        }
    }

    fn openssl(&self) -> Invocation {
        Invocation::new(&self.acme.openssl)
    }

    async fn generate_key(&self, path: &Path) -> Result<()> {
        self.runner
            .run(
                &self
                    .openssl()
                    .arg("genrsa")
                    .arg("-out")
                    .path_arg(path)
                    .arg(self.acme.key_bits.to_string()),
            )
            .await
            .with_context(|| format!("Failed to generate key '{}'", path.display()))?;
        Ok(())
    }

    async fn generate_csr(&self, domain: &str) -> Result<()> {
        let key = self.tree.domain_key(domain);
        let csr = self.tree.domain_csr(domain);
        self.runner
            .run(
                &self
                    .openssl()
                    .args(["req", "-new", "-sha256", "-key"])
                    .path_arg(&key)
                    .args(["-subj", "/", "-addext"])
                    .arg(format!("subjectAltName=DNS:{}", domain))
                    .arg("-out")
                    .path_arg(&csr),
            )
            .await
            .with_context(|| format!("Failed to generate CSR for '{}'", domain))?;
        Ok(())
    }

    /// Create account key, DH parameters, per-domain keys and CSRs, and the
    /// cached cross-sign certificate, skipping whatever already exists
    pub async fn bootstrap(
        &self,
        manifest: &Manifest,
        options: BootstrapOptions,
    ) -> Result<BootstrapReport> {
        let https = self.tree.https_dir();
        layout::ensure_dir(&https)?;
        let mut report = BootstrapReport::default();

        let account_key = self.tree.account_key();
        if !account_key.exists() {
            info!(path = %account_key.display(), "Generating account key");
            self.generate_key(&account_key).await?;
            report.account_key_generated = true;
        }

        let dhparam = self.tree.dhparam();
        if !dhparam.exists() {
            info!(path = %dhparam.display(), bits = self.acme.dhparam_bits, "Generating DH parameters, this takes a while");
            self.runner
                .run(
                    &self
                        .openssl()
                        .arg("dhparam")
                        .arg("-out")
                        .path_arg(&dhparam)
                        .arg(self.acme.dhparam_bits.to_string()),
                )
                .await
                .context("Failed to generate DH parameters")?;
            report.dhparam_generated = true;
        }

        for domain in sites::domains(manifest) {
            let key = self.tree.domain_key(domain);
            if key.exists() && !options.force {
                debug!(domain, "Keeping existing domain key");
                if !self.tree.domain_csr(domain).exists() {
                    self.generate_csr(domain).await?;
                }
                report.keys_kept.push(domain.to_string());
                continue;
            }

            info!(domain, "Generating domain key and CSR");
            self.generate_key(&key).await?;
            self.generate_csr(domain).await?;
            report.keys_generated.push(domain.to_string());
        }

        let cross_sign = self.tree.cross_sign_cert();
        if !cross_sign.exists() {
            fetch_cross_sign(&self.acme.cross_sign_url, &cross_sign).await?;
            report.cross_sign_fetched = true;
        }

        info!(
            generated = report.keys_generated.len(),
            kept = report.keys_kept.len(),
            "HTTPS material ready"
        );
        Ok(report)
    }

    /// Run one renewal cycle for every domain of the manifest
    ///
    /// Returns `Err` only when renewal cannot begin (material missing).
    /// Failures after the temporary proxy was launched are reported in the
    /// returned [`RenewalReport`].
    pub async fn renew<R: Rng + ?Sized>(
        &self,
        manifest: &Manifest,
        rng: &mut R,
    ) -> Result<RenewalReport> {
        let account_key = self.tree.account_key();
        let cross_sign = self.tree.cross_sign_cert();
        for required in [&account_key, &cross_sign] {
            if !required.exists() {
                anyhow::bail!(
                    "'{}' is missing; run init-https first",
                    required.display()
                );
            }
        }
        let signer = self.acme.signer_command()?;

        let docker = DockerCli::new(self.runner, self.runtime.docker.clone());
        let run_tag = RunTag::generate(rng);
        let mut state = RenewalState::Idle;
        debug!(run_tag = %run_tag, state = ?state, "Renewal starting");

        let proxy = ContainerSpec::new(&self.runtime.proxy_name, &self.runtime.proxy_image)
            .publish(80, 80)
            .label(run_tag.as_str())
            .volume(self.tree.challenge_conf_dir(), CONTAINER_CONF_DIR)
            .volume(self.tree.https_dir(), format!("{}/", CONTAINER_CHALLENGE_ROOT));

        let mut outcomes = Vec::new();
        let proxy_error = match docker.run_detached(&proxy).await {
            Ok(_) => {
                state = RenewalState::TempProxyRunning;
                info!(run_tag = %run_tag, "Temporary challenge proxy running");
                None
            }
            Err(e) => {
                error!(run_tag = %run_tag, error = %e, "Temporary challenge proxy failed to start");
                Some(e.to_string())
            }
        };

        if proxy_error.is_none() {
            for domain in sites::domains(manifest) {
                state = RenewalState::Signing;
                let result = self.sign_domain(domain, &signer).await;
                match &result {
                    Ok(path) => info!(domain, path = %path.display(), "Certificate renewed"),
                    Err(e) => error!(domain, error = %format!("{:#}", e), "Certificate renewal failed"),
                }
                outcomes.push(DomainOutcome {
                    domain: domain.to_string(),
                    result: result.map_err(|e| format!("{:#}", e)),
                });
            }
        }

        let teardown_error = match docker.stop_by_label(run_tag.as_str()).await {
            Ok(_) => None,
            Err(e) => {
                warn!(run_tag = %run_tag, error = %e, "Temporary proxy teardown failed; stop containers labelled with the run tag manually");
                Some(e.to_string())
            }
        };
        if state != RenewalState::Idle {
            state = RenewalState::TempProxyStopped;
        }
        debug!(run_tag = %run_tag, state = ?state, "Renewal finished");

        Ok(RenewalReport {
            run_tag,
            outcomes,
            proxy_error,
            teardown_error,
            final_state: state,
        })
    }

    /// Invoke the signer for one domain and write its signed and chained
    /// certificates
    async fn sign_domain(&self, domain: &str, signer: &[String]) -> Result<PathBuf> {
        let challenge_dir = self.tree.challenge_dir(domain);
        layout::ensure_dir(&challenge_dir)?;

        let invocation = Invocation::from_words(signer)
            .context("Signer command is empty")?
            .arg("--account-key")
            .path_arg(&self.tree.account_key())
            .arg("--csr")
            .path_arg(&self.tree.domain_csr(domain))
            .arg("--acme-dir")
            .path_arg(&challenge_dir);

        let signed = self.runner.run(&invocation).await?;
        if signed.iter().all(u8::is_ascii_whitespace) {
            anyhow::bail!("signer produced no certificate");
        }
        layout::write_file(&self.tree.signed_cert(domain), &signed)?;

        let cross_sign = std::fs::read(self.tree.cross_sign_cert())
            .context("Failed to read cross-sign certificate")?;
        let chained_path = self.tree.chained_cert(domain);
        layout::write_file(&chained_path, &chain(&signed, &cross_sign))?;
        Ok(chained_path)
    }
}

/// Signed leaf certificate followed by the cross-sign certificate
pub fn chain(signed: &[u8], cross_sign: &[u8]) -> Vec<u8> {
    let mut chained = Vec::with_capacity(signed.len() + cross_sign.len() + 1);
    chained.extend_from_slice(signed);
    if !signed.ends_with(b"\n") {
        chained.push(b'\n');
    }
    chained.extend_from_slice(cross_sign);
    chained
}

async fn fetch_cross_sign(url: &str, dest: &Path) -> Result<()> {
    info!(url, "Fetching cross-sign certificate");
    let body = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to fetch '{}'", url))?
        .bytes()
        .await
        .with_context(|| format!("Failed to read '{}'", url))?;
    layout::write_file(dest, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_adds_separator() {
        assert_eq!(chain(b"LEAF", b"CROSS\n"), b"LEAF\nCROSS\n");
        assert_eq!(chain(b"LEAF\n", b"CROSS\n"), b"LEAF\nCROSS\n");
    }

    #[test]
    fn test_report_status() {
        let ok = RenewalReport {
            run_tag: "abcd1234".parse().unwrap(),
            outcomes: vec![DomainOutcome {
                domain: "a.com".into(),
                result: Ok(PathBuf::from("chained-a.com.pem")),
            }],
            proxy_error: None,
            teardown_error: None,
            final_state: RenewalState::TempProxyStopped,
        };
        assert_eq!(ok.status(), RenewalStatus::Completed);
        assert!(ok.into_result().is_ok());

        let failed = RenewalReport {
            run_tag: "abcd1234".parse().unwrap(),
            outcomes: vec![
                DomainOutcome {
                    domain: "a.com".into(),
                    result: Ok(PathBuf::from("chained-a.com.pem")),
                },
                DomainOutcome {
                    domain: "b.com".into(),
                    result: Err("challenge did not pass".into()),
                },
            ],
            proxy_error: None,
            teardown_error: None,
            final_state: RenewalState::TempProxyStopped,
        };
        assert_eq!(failed.status(), RenewalStatus::StoppedWithErrors);
        assert_eq!(
            failed.failures().collect::<Vec<_>>(),
            vec![("b.com", "challenge did not pass")]
        );
        let err = failed.into_result().unwrap_err().to_string();
        assert!(err.contains("b.com: challenge did not pass"));
    }
}
