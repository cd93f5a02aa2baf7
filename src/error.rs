//! Error types shared across the library
//!
//! Manifest problems are fatal for the whole command. External process
//! failures are returned per call site so callers can decide whether to
//! abort (runtime startup) or isolate them (per-domain certificate signing).

use std::path::PathBuf;
use thiserror::Error;

/// Failure to load or interpret a site manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest '{}' is not a valid mapping of url paths to services: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("manifest entry '{url}' has no domain segment")]
    MissingDomain { url: String },

    #[error("manifest entry '{url}': port must be greater than 0")]
    InvalidPort { url: String },
}

/// Failure of an external program (container runtime, openssl, signer)
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ProcessError {
    /// Build a `Failed` error from a program name, exit description and raw stderr
    pub fn failed(program: &str, status: impl ToString, stderr: &[u8]) -> Self {
        ProcessError::Failed {
            program: program.to_string(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

/// Failure to load the tool settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse settings '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failure_message() {
        let err = ProcessError::failed("docker", "exit status: 125", b"no such image\n");
        assert_eq!(
            err.to_string(),
            "'docker' exited with exit status: 125: no such image"
        );
    }

    #[test]
    fn test_manifest_error_messages() {
        let err = ManifestError::MissingDomain {
            url: "/api".to_string(),
        };
        assert_eq!(err.to_string(), "manifest entry '/api' has no domain segment");

        let err = ManifestError::InvalidPort {
            url: "example.com".to_string(),
        };
        assert!(err.to_string().contains("port must be greater than 0"));
    }
}
