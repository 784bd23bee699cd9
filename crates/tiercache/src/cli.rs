//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tiercache_service::caching::{BytesCodec, CacheKey, ObjectCache, StorageTier};
use tiercache_service::config::Config;
use tiercache_service::download::{DownloadTimeouts, HttpTransport};
use tiercache_service::metrics;
use url::Url;

use crate::logging;

/// tiercache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Retrieve an object through the cache.
    Fetch {
        /// The locator of the object.
        url: Url,

        /// Write the object to this file instead of printing a summary.
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Remove an object from the cache.
    Remove {
        /// The locator of the object.
        url: Url,
    },

    /// Remove all objects from the cache.
    Clear,

    /// Purge expired objects and enforce the size limit.
    Cleanup,

    /// Print the number and total size of persisted objects.
    Stats,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded here, the runtime is started below.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone()
            && let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok())
        {
            tags.insert(tag, name);
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(cli.command, config))
}

fn create_cache(config: &Config) -> Result<ObjectCache<BytesCodec>> {
    let transport = HttpTransport::with_timeouts(DownloadTimeouts::from_config(config));
    ObjectCache::from_config(config, BytesCodec, Arc::new(transport))
        .context("failed to open the cache directory")
}

fn storage(cache: &ObjectCache<BytesCodec>) -> Result<&StorageTier> {
    cache
        .storage()
        .context("no caching configured! Did you provide a path to your config file?")
}

async fn run(command: Command, config: Config) -> Result<()> {
    let cache = create_cache(&config)?;

    match command {
        Command::Fetch { url, output } => {
            let (object, source) = cache
                .retrieve_traced(&url)
                .await
                .with_context(|| format!("failed to retrieve `{url}`"))?;

            match output {
                Some(path) => tokio::fs::write(&path, &object)
                    .await
                    .with_context(|| format!("failed to write `{}`", path.display()))?,
                None => println!("{}: {} bytes from {}", url, object.len(), source),
            }
        }
        Command::Remove { url } => {
            cache.remove(&CacheKey::from_locator(&url));
            tracing::info!("Removed `{}`", url);
        }
        Command::Clear => {
            storage(&cache)?;
            cache.remove_all();
            tracing::info!("Cleared all cached objects");
        }
        Command::Cleanup => {
            let storage = storage(&cache)?;
            let purged = storage.purge_expired();
            let evicted = storage.enforce_limits();
            println!(
                "removed {} files ({} bytes), retained {} files ({} bytes)",
                purged.removed_files + evicted.removed_files,
                purged.removed_bytes + evicted.removed_bytes,
                evicted.retained_files,
                evicted.retained_bytes,
            );
        }
        Command::Stats => {
            let stats = storage(&cache)?.stats();
            println!("{} entries, {} bytes", stats.entries, stats.bytes);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "tiercache",
            "fetch",
            "https://cdn.example.com/a.png",
            "--output",
            "a.png",
            "--config",
            "tiercache.yml",
        ])
        .unwrap();

        assert_eq!(cli.config(), Some(Path::new("tiercache.yml")));
        match cli.command {
            Command::Fetch { url, output } => {
                assert_eq!(url.as_str(), "https://cdn.example.com/a.png");
                assert_eq!(output, Some(PathBuf::from("a.png")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(Cli::try_parse_from(["tiercache", "remove", "not a url"]).is_err());
    }

    #[test]
    fn test_storage_required() {
        let config = Config::default();
        let cache = create_cache(&config).unwrap();
        assert!(storage(&cache).is_err());
    }
}
