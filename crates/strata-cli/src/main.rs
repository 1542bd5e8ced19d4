mod config;

use std::sync::Arc;

use clap::Parser;
use strata_artifacts::{ArtifactCache, ArtifactStore, ArtifactStoreWriteOptions, Sha256Hash};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Command, StrataConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = StrataConfig::load(cli.config.as_deref())?.with_overrides(cli.root, cli.cache_root);
    debug!(root = %config.store.root.display(), "Loaded configuration");

    let store = Arc::new(ArtifactStore::new(config.store.clone())?);

    match cli.command {
        Command::Store {
            file,
            media_type,
            regions,
        } => {
            let source = tokio::fs::File::open(&file).await?;
            let manifest = store
                .store(source, &media_type, ArtifactStoreWriteOptions::with_regions(regions))
                .await?;
            println!("{}", manifest.artifact_id());
        }

        Command::Cat { id } => {
            let id: Sha256Hash = id.parse()?;
            let mut reader = store
                .try_open(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Artifact {} not found", id))?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }

        Command::Info { id } => {
            let id: Sha256Hash = id.parse()?;
            let manifest = store
                .try_get_manifest(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Artifact {} not found", id))?;

            println!("artifact:      {}", manifest.artifact_id());
            println!("media type:    {}", manifest.media_type());
            println!("bytes:         {}", manifest.byte_length());
            println!("manifest hash: {}", manifest.compute_manifest_hash());
            println!("chunks:        {}", manifest.chunks().len());
            for (seq, chunk) in manifest.chunks().iter().enumerate() {
                println!(
                    "  {:>5}  {}  {:>9} -> {:>9}  {}",
                    seq, chunk.hash, chunk.uncompressed_length, chunk.stored_length, chunk.compression
                );
            }
            if !manifest.region_index().is_empty() {
                println!("regions:       {}", manifest.region_index().len());
                for region in manifest.region_index() {
                    println!(
                        "  {:>5}  offset {}  length {}",
                        region.region_id, region.offset, region.length
                    );
                }
            }
        }

        Command::Materialize { id } => {
            let id: Sha256Hash = id.parse()?;
            let cache = ArtifactCache::new(store, config.cache);
            let entry = cache.ensure(&id).await?;
            println!("{}", entry.path.display());
        }
    }

    Ok(())
}
