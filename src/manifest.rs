//! Site manifest: a mapping of `domain[/subpath]` to the service behind it
//!
//! ```yaml
//! example.com:
//!   image: nginxdemos/hello
//!   port: 80
//! example.com/api:
//!   image: registry.local/api
//!   port: 8080
//! ```
//!
//! YAML is the default format; files ending in `.toml` are read as TOML.

use crate::error::ManifestError;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Port used when an entry does not name one
pub const DEFAULT_PORT: u16 = 80;

/// The service a url path is routed to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceSpec {
    /// Container image started for this path
    pub image: String,

    /// Port the service listens on inside its container (default: 80)
    #[serde(default = "default_port", deserialize_with = "port_or_default")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Accept a missing, null or numeric port
fn port_or_default<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u16>::deserialize(deserializer)?.unwrap_or(DEFAULT_PORT))
}

/// One `urlPath -> service` line of the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub url: String,
    pub service: ServiceSpec,
}

impl ManifestEntry {
    pub fn new(url: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            url: url.into(),
            service: ServiceSpec {
                image: image.into(),
                port,
            },
        }
    }

    /// Text before the first `/`, or the whole url when there is none
    pub fn domain(&self) -> &str {
        domain_of(&self.url)
    }

    /// Text after the first `/`; empty when the entry is the domain root
    pub fn location(&self) -> &str {
        self.url.split_once('/').map(|(_, rest)| rest).unwrap_or("")
    }

    /// Stable container hostname for this entry: `prefix` plus the url with
    /// every non-alphanumeric character replaced by `_`
    pub fn hostname(&self, prefix: &str) -> String {
        let sanitized: String = self
            .url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}{}", prefix, sanitized)
    }
}

/// Domain part of a manifest url path
pub fn domain_of(url: &str) -> &str {
    url.split_once('/').map(|(domain, _)| domain).unwrap_or(url)
}

/// Serialized manifest format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Toml,
}

impl ManifestFormat {
    /// Pick the format from the file extension
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ManifestFormat::Toml,
            _ => ManifestFormat::Yaml,
        }
    }
}

/// A loaded manifest, entries ordered by url path
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Read and validate a manifest file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self::parse(&content, ManifestFormat::for_path(&path), path)
    }

    /// Decode manifest text; `path` is only used for error messages and to
    /// locate the generated tree
    pub fn parse(
        content: &str,
        format: ManifestFormat,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ManifestError> {
        let path = path.into();
        let decoded: Result<BTreeMap<String, ServiceSpec>, String> = match format {
            ManifestFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ManifestFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };
        let services = decoded.map_err(|message| ManifestError::Decode {
            path: path.clone(),
            message,
        })?;
        // An empty or null document decodes to an empty map
        if services.is_empty() {
            return Err(ManifestError::Decode {
                path,
                message: "no url paths defined".to_string(),
            });
        }

        let entries = services
            .into_iter()
            .map(|(url, service)| ManifestEntry { url, service })
            .collect();

        let manifest = Self { path, entries };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for entry in &self.entries {
            if entry.domain().is_empty() {
                return Err(ManifestError::MissingDomain {
                    url: entry.url.clone(),
                });
            }
            if entry.service.port == 0 {
                return Err(ManifestError::InvalidPort {
                    url: entry.url.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the manifest file
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_manifest() {
        let yaml = r#"
b.com:
  image: z
a.com/admin:
  image: y
  port: 9000
a.com:
  image: x
  port: 8000
"#;
        let manifest = Manifest::parse(yaml, ManifestFormat::Yaml, "/srv/sites.yml").unwrap();
        let urls: Vec<&str> = manifest.entries().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["a.com", "a.com/admin", "b.com"]);
        assert_eq!(manifest.entries()[2].service.port, 80);
        assert_eq!(manifest.base_dir(), Path::new("/srv"));
    }

    #[test]
    fn test_parse_toml_manifest() {
        let toml = r#"
["example.com"]
image = "hello"

["example.com/api"]
image = "api"
port = 8080
"#;
        let manifest = Manifest::parse(toml, ManifestFormat::Toml, "sites.toml").unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[1].service.port, 8080);
    }

    #[test]
    fn test_null_port_defaults() {
        let yaml = "example.com:\n  image: x\n  port:\n";
        let manifest = Manifest::parse(yaml, ManifestFormat::Yaml, "m.yml").unwrap();
        assert_eq!(manifest.entries()[0].service.port, DEFAULT_PORT);
    }

    #[test]
    fn test_not_a_mapping() {
        let err = Manifest::parse("- a\n- b\n", ManifestFormat::Yaml, "m.yml").unwrap_err();
        assert!(matches!(err, ManifestError::Decode { .. }));

        for empty in ["", "~\n", "{}\n"] {
            let err = Manifest::parse(empty, ManifestFormat::Yaml, "m.yml").unwrap_err();
            assert!(matches!(err, ManifestError::Decode { .. }), "{:?}", empty);
        }

        let err = Manifest::parse("", ManifestFormat::Toml, "m.toml").unwrap_err();
        assert!(matches!(err, ManifestError::Decode { .. }));
    }

    #[test]
    fn test_missing_domain_segment() {
        let err =
            Manifest::parse("/api:\n  image: x\n", ManifestFormat::Yaml, "m.yml").unwrap_err();
        assert!(matches!(err, ManifestError::MissingDomain { url } if url == "/api"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let err =
            Manifest::parse("a.com:\n  image: x\n  port: 0\n", ManifestFormat::Yaml, "m.yml")
                .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidPort { .. }));
    }

    #[test]
    fn test_entry_parts() {
        let entry = ManifestEntry::new("example.com/api/v1", "img", 8080);
        assert_eq!(entry.domain(), "example.com");
        assert_eq!(entry.location(), "api/v1");
        assert_eq!(entry.hostname("cleat-"), "cleat-example_com_api_v1");

        let root = ManifestEntry::new("example.com", "img", 80);
        assert_eq!(root.domain(), "example.com");
        assert_eq!(root.location(), "");
        assert_eq!(root.hostname("cleat-"), "cleat-example_com");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load("/nonexistent/cleat/sites.yml").unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ManifestFormat::for_path(Path::new("a.toml")), ManifestFormat::Toml);
        assert_eq!(ManifestFormat::for_path(Path::new("a.yml")), ManifestFormat::Yaml);
        assert_eq!(ManifestFormat::for_path(Path::new("sites")), ManifestFormat::Yaml);
    }
}
