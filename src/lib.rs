//! Cleat - reverse proxy configs and certificates from a site manifest
//!
//! This library turns a manifest mapping `domain[/path]` to container images
//! into:
//! - one nginx config per domain, with plaintext and TLS server blocks
//! - challenge-only configs for HTTP-01 certificate issuance
//! - account, domain keys and CSRs, and signed certificates chained with
//!   the issuer cross-sign certificate
//!
//! It also starts and stops the proxy and backend containers as a batch
//! identified by a random run tag.

pub mod acme;
pub mod config;
pub mod docker;
pub mod error;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod nginx;
pub mod process;
pub mod runtime;
pub mod sites;
pub mod template;
