//! nginx config generation
//!
//! Every domain of the manifest gets one `<domain>.conf` holding a port 80
//! server block and, when TLS is enabled, a `443 ssl` server block. Each url
//! path of the domain becomes a `location` proxying to the backend container
//! whose hostname is derived from that url path.

use crate::layout::{self, OutputTree, CONTAINER_CERT_ROOT, CONTAINER_CHALLENGE_ROOT};
use crate::manifest::{Manifest, ManifestEntry};
use crate::sites::{self, DomainGroup};
use crate::template::{render, PlaceholderTable};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TEMPLATE_PORT_LISTEN: &str = "    listen << PORT_80_443 >>;
    server_name << DOMAIN_NAME >>;
";

const TEMPLATE_WELLKNOWN_LOCATION: &str = "    location /.well-known/ {
        root << CHALLENGE_ROOT >>/<< DOMAIN_NAME >>/;
    }
";

const TEMPLATE_SSL_CONFIG: &str = r#"    add_header Strict-Transport-Security max-age=31536000;

    ssl_certificate << CLEAT_ROOT >>/chained-<< DOMAIN_NAME >>.pem;
    ssl_certificate_key << CLEAT_ROOT >>/<< DOMAIN_NAME >>.key;
    ssl_session_timeout 5m;
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES128-SHA:ECDHE-ECDSA-AES256-SHA:ECDHE-ECDSA-AES128-SHA256:ECDHE-ECDSA-AES256-SHA384:ECDHE-RSA-AES128-SHA:ECDHE-RSA-AES256-SHA:ECDHE-RSA-AES128-SHA256:ECDHE-RSA-AES256-SHA384:DHE-RSA-AES128-GCM-SHA256:DHE-RSA-AES256-GCM-SHA384:DHE-RSA-AES128-SHA:DHE-RSA-AES256-SHA:DHE-RSA-AES128-SHA256:DHE-RSA-AES256-SHA256";
    ssl_session_cache shared:SSL:50m;
    ssl_dhparam << CLEAT_ROOT >>/dhparam4096.pem;
    ssl_prefer_server_ciphers on;
"#;

const TEMPLATE_LOCATION_CHUNK: &str = "    location /<< LOCATION >> {
        proxy_set_header    Host $host;
        proxy_set_header    X-Real-IP $remote_addr;
        proxy_set_header    X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header    X-Forwarded-Proto $scheme;

        proxy_pass          http://<< HOSTNAME >>:<< PORT >>;
        << REWRITE >>
        proxy_read_timeout  90;
    }
";

/// Which server blocks get generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Append the `443 ssl` server block
    pub tls: bool,
    /// Route url paths on port 80 as well
    pub plain: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            tls: true,
            plain: false,
        }
    }
}

/// Rewrite rule stripping the sub-path before proxying, if there is one
pub fn rewrite_directive(entry: &ManifestEntry) -> Option<String> {
    let location = entry.location();
    if location.is_empty() {
        None
    } else {
        Some(format!("rewrite /{}/(.*) /$1  break;", location))
    }
}

fn site_table(domain: &str) -> PlaceholderTable {
    PlaceholderTable::new()
        .with("DOMAIN_NAME", domain)
        .with("CLEAT_ROOT", CONTAINER_CERT_ROOT)
        .with("CHALLENGE_ROOT", CONTAINER_CHALLENGE_ROOT)
}

fn server_block(chunks: Vec<String>) -> String {
    let mut lines = Vec::with_capacity(chunks.len() + 2);
    lines.push("server {".to_string());
    lines.extend(chunks);
    lines.push("}\n".to_string());
    lines.join("\n")
}

/// Writes nginx configs into an output tree
#[derive(Debug, Clone)]
pub struct NginxEmitter {
    tree: OutputTree,
    hostname_prefix: String,
}

impl NginxEmitter {
    pub fn new(tree: OutputTree, hostname_prefix: impl Into<String>) -> Self {
        Self {
            tree,
            hostname_prefix: hostname_prefix.into(),
        }
    }

    /// `location` block routing one url path to its backend
    pub fn location_block(&self, entry: &ManifestEntry) -> String {
        let table = site_table(entry.domain())
            .with("LOCATION", entry.location())
            .with("PORT", entry.service.port)
            .with("HOSTNAME", entry.hostname(&self.hostname_prefix))
            .with("REWRITE", rewrite_directive(entry).unwrap_or_default());
        render(TEMPLATE_LOCATION_CHUNK, &table).text
    }

    /// Full config file contents for one domain
    pub fn render_site(&self, group: &DomainGroup<'_>, options: EmitOptions) -> String {
        let table = site_table(group.domain);

        let mut port80 =
            vec![render(TEMPLATE_PORT_LISTEN, &table.clone().with("PORT_80_443", 80)).text];
        let mut port443 = vec![
            render(TEMPLATE_PORT_LISTEN, &table.clone().with("PORT_80_443", "443 ssl")).text,
            render(TEMPLATE_SSL_CONFIG, &table).text,
        ];

        for entry in &group.entries {
            let location = self.location_block(entry);
            if options.plain {
                port80.push(location.clone());
            }
            port443.push(location);
        }

        let mut contents = server_block(port80);
        if options.tls {
            contents.push_str(&server_block(port443));
        }
        contents
    }

    /// Challenge-only config for one domain: port 80 serving `/.well-known/`
    pub fn render_challenge_site(&self, domain: &str) -> String {
        let table = site_table(domain).with("PORT_80_443", 80);
        server_block(vec![
            render(TEMPLATE_PORT_LISTEN, &table).text,
            render(TEMPLATE_WELLKNOWN_LOCATION, &table).text,
        ])
    }

    /// Regenerate `nginx/conf.d`, one file per domain
    pub fn emit_proxy_config(
        &self,
        manifest: &Manifest,
        options: EmitOptions,
    ) -> Result<Vec<PathBuf>> {
        let dir = self.tree.proxy_conf_dir();
        layout::ensure_dir(&dir)?;

        let mut written = Vec::new();
        for group in sites::group_manifest(manifest) {
            let path = self.tree.proxy_conf(group.domain);
            layout::write_file(&path, self.render_site(&group, options).as_bytes())?;
            debug!(domain = %group.domain, locations = group.entries.len(), path = %path.display(), "Wrote proxy config");
            written.push(path);
        }

        remove_stale_configs(&dir, &written)?;
        info!(dir = %dir.display(), sites = written.len(), tls = options.tls, plain = options.plain, "Proxy config generated");
        Ok(written)
    }

    /// Regenerate `nginx-acme`, one file per domain
    pub fn emit_challenge_config(&self, manifest: &Manifest) -> Result<Vec<PathBuf>> {
        let dir = self.tree.challenge_conf_dir();
        layout::ensure_dir(&dir)?;

        let mut written = Vec::new();
        for domain in sites::domains(manifest) {
            let path = self.tree.challenge_conf(domain);
            layout::write_file(&path, self.render_challenge_site(domain).as_bytes())?;
            debug!(domain = %domain, path = %path.display(), "Wrote challenge config");
            written.push(path);
        }

        remove_stale_configs(&dir, &written)?;
        info!(dir = %dir.display(), sites = written.len(), "Challenge config generated");
        Ok(written)
    }
}

/// Delete `*.conf` files in `dir` that this run did not write
fn remove_stale_configs(dir: &Path, keep: &[PathBuf]) -> Result<()> {
    let keep: HashSet<&Path> = keep.iter().map(PathBuf::as_path).collect();
    let listing = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list '{}'", dir.display()))?;

    for entry in listing {
        let path = entry?.path();
        let is_conf = path.extension().map_or(false, |ext| ext == "conf");
        if is_conf && path.is_file() && !keep.contains(path.as_path()) {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale config '{}'", path.display()))?;
            info!(path = %path.display(), "Removed config for domain no longer in manifest");
        }
    }
    Ok(())
}
