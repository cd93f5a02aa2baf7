use anyhow::Result;
use clap::{Parser, Subcommand};
use cleat::acme::{AcmeOrchestrator, BootstrapOptions};
use cleat::config::Settings;
use cleat::layout::OutputTree;
use cleat::manifest::Manifest;
use cleat::nginx::{EmitOptions, NginxEmitter};
use cleat::process::SystemRunner;
use cleat::runtime::{RunTag, RuntimeController};
use std::path::{Path, PathBuf};
use tracing::info;

/// cleat - nginx reverse proxy configs and certificates from a site manifest
#[derive(Parser)]
#[command(name = "cleat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: $CLEAT_CONFIG, ./cleat.toml beside the manifest, ~/.cleat/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root of the generated tree (default: .cleat beside the manifest)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate nginx proxy configs, one file per domain
    Generate {
        /// Site manifest (YAML, or TOML with a .toml extension)
        manifest: PathBuf,

        /// Leave out the 443 ssl server block
        #[arg(long)]
        no_tls: bool,

        /// Route paths on port 80 as well
        #[arg(long)]
        plain: bool,
    },

    /// Generate challenge-only nginx configs for certificate issuance
    GenerateAcme { manifest: PathBuf },

    /// Create account key, DH parameters, domain keys and CSRs
    InitHttps {
        manifest: PathBuf,

        /// Regenerate domain keys and CSRs that already exist
        #[arg(long)]
        force: bool,
    },

    /// Renew certificates for every domain through a temporary proxy
    Renew {
        manifest: PathBuf,
    },

    /// Start the proxy and backend containers; prints the run tag
    Up {
        manifest: PathBuf,
    },

    /// Stop every container started under a run tag
    Down {
        run_tag: String,

        /// Manifest the batch was started from; its cleat.toml supplies the
        /// network prefix (default: look in the current directory)
        manifest: Option<PathBuf>,
    },
}

/// Manifest plus the settings and output tree that go with it
struct Workspace {
    manifest: Manifest,
    settings: Settings,
    tree: OutputTree,
}

impl Workspace {
    fn open(cli_config: Option<&Path>, cli_output: Option<&Path>, manifest: &Path) -> Result<Self> {
        let manifest = Manifest::load(manifest)?;
        info!(path = %manifest.path().display(), entries = manifest.len(), "Manifest loaded");

        let settings = Settings::discover(cli_config, manifest.base_dir())?;
        let tree = match cli_output {
            Some(dir) => OutputTree::new(dir),
            None => settings.output_tree(manifest.base_dir()),
        };

        Ok(Self {
            manifest,
            settings,
            tree,
        })
    }

    fn emitter(&self) -> NginxEmitter {
        NginxEmitter::new(self.tree.clone(), &self.settings.runtime.hostname_prefix)
    }

    fn acme<'a>(&self, runner: &'a SystemRunner) -> AcmeOrchestrator<'a> {
        AcmeOrchestrator::new(
            runner,
            self.tree.clone(),
            self.settings.acme.clone(),
            self.settings.runtime.clone(),
        )
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    cleat::logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    let output = cli.output.as_deref();
    let runner = SystemRunner;

    match cli.command {
        Commands::Generate {
            manifest,
            no_tls,
            plain,
        } => {
            let ws = Workspace::open(config, output, &manifest)?;
            let options = EmitOptions {
                tls: !no_tls,
                plain,
            };
            let written = ws.emitter().emit_proxy_config(&ws.manifest, options)?;
            for path in written {
                println!("{}", path.display());
            }
        }

        Commands::GenerateAcme { manifest } => {
            let ws = Workspace::open(config, output, &manifest)?;
            let written = ws.emitter().emit_challenge_config(&ws.manifest)?;
            for path in written {
                println!("{}", path.display());
            }
        }

        Commands::InitHttps { manifest, force } => {
            let ws = Workspace::open(config, output, &manifest)?;
            ws.acme(&runner)
                .bootstrap(&ws.manifest, BootstrapOptions { force })
                .await?;
        }

        Commands::Renew { manifest } => {
            let ws = Workspace::open(config, output, &manifest)?;
            // The temporary proxy serves whatever is in nginx-acme
            ws.emitter().emit_challenge_config(&ws.manifest)?;
            let report = ws
                .acme(&runner)
                .renew(&ws.manifest, &mut rand::thread_rng())
                .await?
                .into_result()?;
            info!(run_tag = %report.run_tag, domains = report.outcomes.len(), "Renewal complete");
        }

        Commands::Up { manifest } => {
            let ws = Workspace::open(config, output, &manifest)?;
            let controller = RuntimeController::new(&runner, ws.settings.runtime.clone());
            let tag = controller
                .start_all(&ws.manifest, &ws.tree, &mut rand::thread_rng())
                .await?;
            info!("Stop with: cleat down {} {}", tag, manifest.display());
            println!("{}", tag);
        }

        Commands::Down { run_tag, manifest } => {
            let tag: RunTag = run_tag.parse().map_err(anyhow::Error::msg)?;
            let settings = Settings::discover_for(config, manifest.as_deref())?;
            let controller = RuntimeController::new(&runner, settings.runtime);
            controller.stop_all(&tag).await?;
        }
    }

    Ok(())
}
