//! On-disk layout of everything cleat generates
//!
//! ```text
//! <root>/
//!   nginx/conf.d/<domain>.conf     full proxy config
//!   nginx-acme/<domain>.conf       challenge-only config
//!   https/                         keys, CSRs, certificates, challenge dirs
//! ```

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default name of the generated tree, created next to the manifest
pub const GENERATED_DIR: &str = ".cleat";

/// Where the proxy container sees the HTTPS material directory
pub const CONTAINER_CERT_ROOT: &str = "/etc/nginx/cleat";

/// Where the proxy container reads its config files
pub const CONTAINER_CONF_DIR: &str = "/etc/nginx/conf.d";

/// Where the temporary ACME proxy serves challenge files from
pub const CONTAINER_CHALLENGE_ROOT: &str = "/usr/share/nginx";

pub const ACCOUNT_KEY: &str = "account.key";
pub const DHPARAM: &str = "dhparam4096.pem";
pub const CROSS_SIGN_CERT: &str = "lets-encrypt-x3-cross-signed.pem";

/// Paths of the generated output tree rooted at one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    /// Relative roots are resolved against the current directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// The default tree for a manifest living in `manifest_dir`
    pub fn beside(manifest_dir: &Path) -> Self {
        Self::new(manifest_dir.join(GENERATED_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn proxy_conf_dir(&self) -> PathBuf {
        self.root.join("nginx").join("conf.d")
    }

    pub fn challenge_conf_dir(&self) -> PathBuf {
        self.root.join("nginx-acme")
    }

    pub fn https_dir(&self) -> PathBuf {
        self.root.join("https")
    }

    pub fn proxy_conf(&self, domain: &str) -> PathBuf {
        self.proxy_conf_dir().join(format!("{}.conf", domain))
    }

    pub fn challenge_conf(&self, domain: &str) -> PathBuf {
        self.challenge_conf_dir().join(format!("{}.conf", domain))
    }

    pub fn account_key(&self) -> PathBuf {
        self.https_dir().join(ACCOUNT_KEY)
    }

    pub fn dhparam(&self) -> PathBuf {
        self.https_dir().join(DHPARAM)
    }

    pub fn cross_sign_cert(&self) -> PathBuf {
        self.https_dir().join(CROSS_SIGN_CERT)
    }

    pub fn domain_key(&self, domain: &str) -> PathBuf {
        self.https_dir().join(format!("{}.key", domain))
    }

    pub fn domain_csr(&self, domain: &str) -> PathBuf {
        self.https_dir().join(format!("{}.csr", domain))
    }

    pub fn signed_cert(&self, domain: &str) -> PathBuf {
        self.https_dir().join(format!("signed-{}.crt", domain))
    }

    pub fn chained_cert(&self, domain: &str) -> PathBuf {
        self.https_dir().join(format!("chained-{}.pem", domain))
    }

    /// Directory the signer drops HTTP-01 challenge files into
    pub fn challenge_dir(&self, domain: &str) -> PathBuf {
        self.https_dir()
            .join(domain)
            .join(".well-known")
            .join("acme-challenge")
    }
}

/// Create `dir` and its parents if missing
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory '{}'", dir.display()))
}

/// Replace the contents of `path`
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over `path`, so readers see either the old or the new file.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in '{}'", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("Failed to write '{}'", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tree_paths() {
        let tree = OutputTree::beside(Path::new("/srv/sites"));
        assert_eq!(tree.root(), Path::new("/srv/sites/.cleat"));
        assert_eq!(
            tree.proxy_conf("a.com"),
            Path::new("/srv/sites/.cleat/nginx/conf.d/a.com.conf")
        );
        assert_eq!(
            tree.challenge_conf("a.com"),
            Path::new("/srv/sites/.cleat/nginx-acme/a.com.conf")
        );
        assert_eq!(
            tree.chained_cert("a.com"),
            Path::new("/srv/sites/.cleat/https/chained-a.com.pem")
        );
        assert_eq!(
            tree.challenge_dir("a.com"),
            Path::new("/srv/sites/.cleat/https/a.com/.well-known/acme-challenge")
        );
    }

    #[test]
    fn test_relative_root_is_absolute() {
        let tree = OutputTree::new("out");
        assert!(tree.root().is_absolute());
        assert!(tree.root().ends_with("out"));
        assert!(tree.https_dir().is_absolute());
    }

    #[test]
    fn test_write_file_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.conf");

        write_file(&path, b"first version, quite long").unwrap();
        write_file(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        ensure_dir(&target).unwrap();
        ensure_dir(&target).unwrap();
        assert!(target.is_dir());
    }
}
