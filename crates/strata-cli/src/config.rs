use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use strata_artifacts::{ArtifactCacheConfig, ArtifactStoreConfig, RegionIndexEntry};

/// On-disk configuration file
///
/// ```toml
/// [store]
/// root = "/var/lib/strata"
///
/// [store.chunking]
/// avg_chunk_size = 1048576
///
/// [store.compression]
/// kind = "zstd"
///
/// [cache]
/// root = "/var/cache/strata"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub store: ArtifactStoreConfig,
    pub cache: ArtifactCacheConfig,
}

impl StrataConfig {
    /// Load from a TOML file, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line root overrides.
    pub fn with_overrides(mut self, root: Option<PathBuf>, cache_root: Option<PathBuf>) -> Self {
        if let Some(root) = root {
            self.store.root = root;
        }
        if let Some(cache_root) = cache_root {
            self.cache.root = cache_root;
        }
        self
    }
}

#[derive(Parser)]
#[command(name = "strata", about = "Content-addressed, deduplicating artifact store")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Store root directory (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
    /// Cache root directory (overrides the config file)
    #[arg(long, global = true)]
    pub cache_root: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a file and print its artifact id
    Store {
        /// File to store
        file: PathBuf,
        /// Media type recorded with the artifact
        #[arg(long, default_value = "application/octet-stream")]
        media_type: String,
        /// Region as id:offset:length (repeatable)
        #[arg(long = "region", value_parser = parse_region)]
        regions: Vec<RegionIndexEntry>,
    },
    /// Write an artifact's bytes to stdout
    Cat {
        /// Artifact id (hex)
        id: String,
    },
    /// Show an artifact's manifest
    Info {
        /// Artifact id (hex)
        id: String,
    },
    /// Materialize an artifact into the cache and print its path
    Materialize {
        /// Artifact id (hex)
        id: String,
    },
}

fn parse_region(s: &str) -> Result<RegionIndexEntry, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [id, offset, length] = parts.as_slice() else {
        return Err(format!("expected id:offset:length, got '{s}'"));
    };
    Ok(RegionIndexEntry::new(
        id.parse().map_err(|e| format!("invalid region id '{id}': {e}"))?,
        offset.parse().map_err(|e| format!("invalid offset '{offset}': {e}"))?,
        length.parse().map_err(|e| format!("invalid length '{length}': {e}"))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_artifacts::CompressionKind;

    #[test]
    fn test_parse_region() {
        assert_eq!(parse_region("3:100:50").unwrap(), RegionIndexEntry::new(3, 100, 50));
        assert!(parse_region("3:100").is_err());
        assert!(parse_region("a:1:2").is_err());
        assert!(parse_region("1:2:3:4").is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: StrataConfig = toml::from_str(
            r#"
            [store]
            root = "/srv/strata"

            [store.chunking]
            avg_chunk_size = 1048576

            [store.compression]
            kind = "zstd"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.root, PathBuf::from("/srv/strata"));
        assert_eq!(config.store.chunking.avg_chunk_size, 1024 * 1024);
        assert_eq!(config.store.chunking.min_chunk_size, 512 * 1024);
        assert_eq!(config.store.compression.kind, CompressionKind::Zstd);
        assert_eq!(config.store.compression.level, 3);
        assert_eq!(config.cache.write_buffer_size, 256 * 1024);
    }

    #[test]
    fn test_overrides() {
        let config = StrataConfig::default()
            .with_overrides(Some(PathBuf::from("/a")), Some(PathBuf::from("/b")));
        assert_eq!(config.store.root, PathBuf::from("/a"));
        assert_eq!(config.cache.root, PathBuf::from("/b"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[cache]\nwrite_buffer_size = 4096\n").unwrap();

        let config = StrataConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache.write_buffer_size, 4096);
        assert!(StrataConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_cli_parses_store() {
        let cli = Cli::parse_from([
            "strata",
            "--root",
            "/tmp/s",
            "store",
            "input.bin",
            "--media-type",
            "text/plain",
            "--region",
            "1:0:4",
            "--region",
            "2:4:6",
        ]);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/s")));
        match cli.command {
            Command::Store {
                file,
                media_type,
                regions,
            } => {
                assert_eq!(file, PathBuf::from("input.bin"));
                assert_eq!(media_type, "text/plain");
                assert_eq!(regions.len(), 2);
            }
            _ => panic!("expected store command"),
        }
    }
}
