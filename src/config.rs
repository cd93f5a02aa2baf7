use crate::error::SettingsError;
use crate::layout::OutputTree;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming a settings file
pub const CONFIG_ENV: &str = "CLEAT_CONFIG";

/// Settings file looked up next to the manifest
pub const LOCAL_CONFIG_FILE: &str = "cleat.toml";

/// Tool settings: where output goes and which external programs to run
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Generated tree location
    #[serde(default)]
    pub output: OutputSettings,

    /// Container runtime settings
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Key generation and certificate signing settings
    #[serde(default)]
    pub acme: AcmeSettings,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct OutputSettings {
    /// Root of the generated tree (default: `.cleat` next to the manifest).
    /// Relative paths are resolved against the manifest directory.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Container runtime CLI (default: docker)
    #[serde(default = "default_docker")]
    pub docker: String,

    /// Image used for the proxy container (default: nginx)
    #[serde(default = "default_proxy_image")]
    pub proxy_image: String,

    /// Name given to the proxy container
    #[serde(default = "default_proxy_name")]
    pub proxy_name: String,

    /// Prefix of the per-batch network name
    #[serde(default = "default_network_prefix")]
    pub network_prefix: String,

    /// Prefix of backend container hostnames
    #[serde(default = "default_hostname_prefix")]
    pub hostname_prefix: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker: default_docker(),
            proxy_image: default_proxy_image(),
            proxy_name: default_proxy_name(),
            network_prefix: default_network_prefix(),
            hostname_prefix: default_hostname_prefix(),
        }
    }
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_proxy_image() -> String {
    "nginx".to_string()
}

fn default_proxy_name() -> String {
    "cleat-nginx-server".to_string()
}

fn default_network_prefix() -> String {
    "cleat_".to_string()
}

fn default_hostname_prefix() -> String {
    "cleat-".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AcmeSettings {
    /// openssl binary used for keys, DH parameters and CSRs
    #[serde(default = "default_openssl")]
    pub openssl: String,

    /// Signer command line; receives `--account-key`, `--csr` and
    /// `--acme-dir` and prints the signed certificate
    #[serde(default = "default_signer")]
    pub signer: String,

    /// Issuer cross-sign certificate appended to every signed certificate
    #[serde(default = "default_cross_sign_url")]
    pub cross_sign_url: String,

    /// RSA key size for account and domain keys
    #[serde(default = "default_key_bits")]
    pub key_bits: u32,

    /// Diffie-Hellman parameter size
    #[serde(default = "default_dhparam_bits")]
    pub dhparam_bits: u32,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            openssl: default_openssl(),
            signer: default_signer(),
            cross_sign_url: default_cross_sign_url(),
            key_bits: default_key_bits(),
            dhparam_bits: default_dhparam_bits(),
        }
    }
}

fn default_openssl() -> String {
    "openssl".to_string()
}

fn default_signer() -> String {
    "python acme/acme_tiny.py".to_string()
}

fn default_cross_sign_url() -> String {
    "https://letsencrypt.org/certs/lets-encrypt-x3-cross-signed.pem".to_string()
}

fn default_key_bits() -> u32 {
    4096
}

fn default_dhparam_bits() -> u32 {
    4096
}

impl AcmeSettings {
    /// Signer command split into program and leading arguments
    pub fn signer_command(&self) -> Result<Vec<String>, SettingsError> {
        let words = shell_words::split(&self.signer)
            .map_err(|e| SettingsError::Invalid(format!("acme.signer: {}", e)))?;
        if words.is_empty() {
            return Err(SettingsError::Invalid("acme.signer must not be empty".to_string()));
        }
        Ok(words)
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Find and load the settings for a manifest in `manifest_dir`
    ///
    /// Lookup order: `explicit`, `$CLEAT_CONFIG`, `cleat.toml` beside the
    /// manifest, `~/.cleat/config.toml`, then built-in defaults.
    pub fn discover(explicit: Option<&Path>, manifest_dir: &Path) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(path);
        }

        let candidates = [
            Some(manifest_dir.join(LOCAL_CONFIG_FILE)),
            dirs_next::home_dir().map(|home| home.join(".cleat").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                debug!(path = %path.display(), "Using settings file");
                return Self::load(path);
            }
        }

        debug!("No settings file found, using defaults");
        Ok(Self::default())
    }

    /// Settings for a command that may name a manifest
    ///
    /// Without one, `cleat.toml` is looked up in the current directory.
    pub fn discover_for(
        explicit: Option<&Path>,
        manifest: Option<&Path>,
    ) -> Result<Self, SettingsError> {
        let dir = match manifest.and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        Self::discover(explicit, dir)
    }

    /// Validate all settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut errors = Vec::new();

        if let Err(e) = self.acme.signer_command() {
            errors.push(e.to_string());
        }
        if self.acme.key_bits == 0 {
            errors.push("acme.key_bits must be greater than 0".to_string());
        }
        if self.acme.dhparam_bits == 0 {
            errors.push("acme.dhparam_bits must be greater than 0".to_string());
        }
        for (field, value) in [
            ("runtime.docker", &self.runtime.docker),
            ("runtime.proxy_image", &self.runtime.proxy_image),
            ("acme.openssl", &self.acme.openssl),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{} must not be empty", field));
            }
        }

        if !errors.is_empty() {
            return Err(SettingsError::Invalid(errors.join("; ")));
        }
        Ok(())
    }

    /// Output tree for a manifest located in `manifest_dir`
    pub fn output_tree(&self, manifest_dir: &Path) -> OutputTree {
        match &self.output.dir {
            Some(dir) => OutputTree::new(manifest_dir.join(dir)),
            None => OutputTree::beside(manifest_dir),
        }
    }
}
