//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cleat::error::ProcessError;
use cleat::manifest::{Manifest, ManifestFormat};
use cleat::process::{Invocation, ProcessRunner};
use parking_lot::Mutex;
use std::path::Path;

type Responder = Box<dyn Fn(&Invocation) -> Result<Vec<u8>, ProcessError> + Send + Sync>;

/// Records every invocation and answers from a scripted responder
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    responder: Responder,
}

impl RecordingRunner {
    /// Every program succeeds with empty output
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(Vec::new()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> Result<Vec<u8>, ProcessError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Calls rendered as single command lines
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Invocation) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError> {
        self.calls.lock().push(invocation.clone());
        (self.responder)(invocation)
    }
}

pub fn failure(program: &str, message: &str) -> ProcessError {
    ProcessError::failed(program, "exit status: 1", message.as_bytes())
}

pub fn is_docker(inv: &Invocation, first: &str) -> bool {
    inv.program == "docker" && inv.args.first().map(String::as_str) == Some(first)
}

/// The three-entry manifest used across tests, placed in `dir`
pub fn sample_manifest(dir: &Path) -> Manifest {
    let yaml = r#"
a.com:
  image: x
  port: 8000
a.com/admin:
  image: y
  port: 9000
b.com:
  image: z
"#;
    let path = dir.join("sites.yml");
    std::fs::write(&path, yaml).unwrap();
    let manifest = Manifest::load(&path).unwrap();
    assert_eq!(ManifestFormat::for_path(manifest.path()), ManifestFormat::Yaml);
    manifest
}

/// Every value following `flag` in the invocation's arguments
pub fn flag_values<'a>(inv: &'a Invocation, flag: &str) -> Vec<&'a str> {
    inv.args
        .windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].as_str())
        .collect()
}
