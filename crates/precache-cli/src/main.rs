//! precache - prefetch a fixed manifest into a versioned cache and answer
//! requests cache-first, falling back to the network.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use precache_core::{
    CacheFetchInterceptor, CacheStorage, Config, DiskCacheStorage, HttpFetcher, InstallMode,
    Preset, RequestDescriptor, WorkerHost,
};

#[derive(Parser)]
#[command(name = "precache", version, about)]
struct Cli {
    /// Deployment config file (JSON). Defaults to ~/.config/precache/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a built-in deployment instead of a config file (uhoues, uhoues-legacy)
    #[arg(long, global = true, conflicts_with = "config")]
    preset: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the selected deployment to a config file for later editing
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Prefetch the manifest into the current generation and activate it
    Install {
        /// Cache whatever can be fetched instead of failing on the first error
        #[arg(long)]
        best_effort: bool,
    },
    /// Request a URL through the cache
    Fetch {
        url: String,
        /// Write the response body to stdout
        #[arg(long)]
        body: bool,
    },
    /// Show cache generations and their entries
    List,
    /// Delete every generation except the current one
    Purge,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    match cli.preset.as_deref() {
        Some(name) => {
            let preset = Preset::from_name(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown preset: {}", name))?;
            Ok(Config::preset(preset))
        }
        None => Config::load(cli.config.as_deref()),
    }
}

fn build_host(config: &Config, storage: Arc<DiskCacheStorage>, best_effort: bool) -> Result<WorkerHost> {
    let fetcher = HttpFetcher::with_timeout(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;

    let mode = if best_effort || config.best_effort {
        InstallMode::BestEffort
    } else {
        InstallMode::Atomic
    };

    let mut interceptor = CacheFetchInterceptor::new(
        config.generation.clone(),
        config.manifest.clone(),
        storage,
        Arc::new(fetcher),
    )
    .with_install_mode(mode);

    if let Some(origin) = config.origin_url()? {
        interceptor = interceptor.with_origin(origin);
    }
    Ok(WorkerHost::register(interceptor))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    info!(generation = %config.generation, "precache starting");

    match cli.command {
        Command::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::config_path()?,
            };
            init(&config, &path, force)
        }
        Command::Install { best_effort } => install(&config, open_storage(&config)?, best_effort).await,
        Command::Fetch { url, body } => fetch(&config, open_storage(&config)?, &url, body).await,
        Command::List => list(&config, &*open_storage(&config)?).await,
        Command::Purge => purge(&config, open_storage(&config)?).await,
    }
}

fn open_storage(config: &Config) -> Result<Arc<DiskCacheStorage>> {
    let cache_dir = config.cache_dir()?;
    debug!(dir = %cache_dir.display(), "Opening cache directory");
    let storage = DiskCacheStorage::new(&cache_dir)
        .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
    Ok(Arc::new(storage))
}

fn init(config: &Config, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config
        .save(path)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    println!("Wrote {} ({})", path.display(), config.generation);
    Ok(())
}

async fn install(config: &Config, storage: Arc<DiskCacheStorage>, best_effort: bool) -> Result<()> {
    let host = build_host(config, storage.clone(), best_effort)?;
    let report = host
        .start()
        .await
        .with_context(|| format!("Install of {} failed", config.generation))?;

    println!("{}: cached {} URL(s)", report.generation, report.cached.len());
    for url in &report.cached {
        println!("  + {}", url);
    }
    for (url, reason) in &report.failed {
        println!("  ! {} ({})", url, reason);
    }

    let older = storage
        .keys()
        .await?
        .into_iter()
        .filter(|name| name != config.generation.as_str())
        .count();
    if older > 0 {
        println!(
            "{} older generation(s) still on disk; run `precache purge` to remove them",
            older
        );
    }
    Ok(())
}

async fn fetch(config: &Config, storage: Arc<DiskCacheStorage>, url: &str, body: bool) -> Result<()> {
    let host = build_host(config, storage, false)?;
    if !host.interceptor().resume().await? {
        eprintln!(
            "Generation {} is not installed; fetching from network",
            config.generation
        );
    }

    let result = host
        .respond_with(RequestDescriptor::get(url))
        .await
        .context("Request task failed")??;

    eprintln!(
        "{} {} ({} bytes, from {})",
        result.response.status,
        url,
        result.response.body.len(),
        result.source
    );
    if body {
        io::stdout().write_all(&result.response.body)?;
    }
    Ok(())
}

async fn list(config: &Config, storage: &DiskCacheStorage) -> Result<()> {
    let generations = storage.keys().await?;
    if generations.is_empty() {
        println!("No cache generations in {}", storage.root().display());
        return Ok(());
    }

    for name in generations {
        let marker = if name == config.generation.as_str() { "*" } else { " " };
        let entries = storage.entries(&name).await?.unwrap_or_default();
        println!("{} {} ({} entries)", marker, name, entries.len());
        for entry in entries {
            println!(
                "    {} {} {} bytes, {} old",
                entry.status,
                entry.key.url,
                entry.body_len,
                entry.age_display()
            );
        }
    }
    Ok(())
}

async fn purge(config: &Config, storage: Arc<DiskCacheStorage>) -> Result<()> {
    let host = build_host(config, storage, false)?;
    let removed = host.interceptor().purge_superseded().await?;
    if removed.is_empty() {
        println!("Nothing to purge");
    }
    for name in removed {
        println!("Deleted {}", name);
    }
    Ok(())
}
