//! Mooring CLI
//!
//! Deploy bundles, inspect the local cache and work with app names.
//!
//! Usage:
//!   mooring deploy ./site --name chat                # Build, sign and cache a bundle
//!   mooring encode chat                              # Name -> address
//!   mooring decode <address>                         # Address -> name
//!   mooring resolve mooring://chat/index.html        # Address -> app ID and claim
//!   mooring cleanup --max-cache 500MB                # Expire apps, enforce budget

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use mooring_core::bundle::SourceFile;
use mooring_core::naming::{self, ClaimOutcome};
use mooring_core::{CacheStrategy, MemoryNetwork, Node, NodeConfig, Permission};

#[derive(Parser)]
#[command(name = "mooring", version, about = "Content-addressed app distribution node")]
struct Cli {
    /// Database path (default: mooring.db)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build, sign and cache every file under a directory
    Deploy {
        dir: PathBuf,
        /// Friendly name; the app ID is derived from it
        #[arg(long)]
        name: String,
        /// Use a custom app ID instead of the name's address
        #[arg(long)]
        app_id: Option<String>,
        #[arg(long, default_value_t = 1)]
        version: u32,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        author: String,
        /// Capability to grant (storage, broadcast); repeatable
        #[arg(long = "permission")]
        permissions: Vec<Permission>,
        /// Check the network for newer versions before using the cache
        #[arg(long)]
        network_first: bool,
        /// How long loaded copies stay fresh (milliseconds)
        #[arg(long)]
        cache_duration_ms: Option<u64>,
    },
    /// Print the address of a name
    Encode { name: String },
    /// Print the name behind an address
    Decode { address: String },
    /// Claim a name for this node
    Claim { name: String },
    /// Resolve an app address
    Resolve { address: String },
    /// Load an app from the local cache and write its document
    Load {
        address: String,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a cached manifest
    Inspect { app_id: String },
    /// Remove expired apps and evict chunks over the budget
    Cleanup {
        /// Chunk budget, e.g. 500MB or 2GB (default: from config)
        #[arg(long, value_parser = parse_size)]
        max_cache: Option<u64>,
    },
    /// Print cache statistics
    Stats,
}

/// Binary size units accepted by `--max-cache`
const SIZE_UNITS: &[(&str, u64)] = &[
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("T", 1 << 40),
    ("G", 1 << 30),
    ("M", 1 << 20),
    ("K", 1 << 10),
    ("B", 1),
];

/// Parse a byte budget such as "500MB", "1.5G" or "4096"
fn parse_size(raw: &str) -> Result<u64, String> {
    let upper = raw.trim().to_ascii_uppercase();
    let (number, multiplier) = SIZE_UNITS
        .iter()
        .find_map(|(unit, mult)| upper.strip_suffix(unit).map(|n| (n.trim(), *mult)))
        .unwrap_or((upper.as_str(), 1));

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size {:?} (expected e.g. 500MB or 2GB)", raw))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("size must be a non-negative number: {:?}", raw));
    }
    Ok((value * multiplier as f64) as u64)
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{} bytes", bytes)
    }
}

/// Every regular file under `root`, with `/`-separated relative paths
fn collect_files(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            files.push(SourceFile::new(name, bytes));
        }
    }
    Ok(files)
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(path)?,
        None => NodeConfig::default(),
    };
    let db_path = cli
        .db_path
        .clone()
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(|| PathBuf::from("mooring.db"));
    Ok(config.with_db_path(db_path))
}

async fn run(cli: Cli) -> Result<()> {
    // commands that never touch the database
    match &cli.command {
        Command::Encode { name } => {
            println!("{}", naming::encode(name)?);
            return Ok(());
        }
        Command::Decode { address } => {
            match naming::decode(address) {
                Some(name) => println!("{}", name),
                None => bail!("not a valid address: {}", address),
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    info!(?config, "opening node");

    // single node; peers arrive through an embedding transport
    let net = MemoryNetwork::new();
    let node = Node::open(config.clone(), Arc::new(net.join(rand::random()))).await?;
    let result = execute(&node, &config, cli.command).await;
    node.close().await;
    result
}

async fn execute(node: &Node, config: &NodeConfig, command: Command) -> Result<()> {
    match command {
        Command::Deploy {
            dir,
            name,
            app_id,
            version,
            description,
            author,
            permissions,
            network_first,
            cache_duration_ms,
        } => {
            let files = collect_files(&dir)?;
            if files.is_empty() {
                bail!("no files under {}", dir.display());
            }

            let mut options = node
                .build_options(name)
                .with_version(version)
                .with_description(description)
                .with_author(author);
            if let Some(app_id) = app_id {
                options = options.with_app_id(app_id);
            }
            for permission in permissions {
                options = options.with_permission(permission);
            }
            if network_first {
                options = options.with_cache_strategy(CacheStrategy::NetworkFirst);
            }
            if let Some(millis) = cache_duration_ms {
                options = options.with_cache_duration_ms(millis);
            }

            let outcome = node.deploy(files, options).await?;
            let manifest = &outcome.manifest;
            println!("App ID:      {}", manifest.app_id);
            println!("Version:     {}", manifest.version);
            println!("Entry point: {}", manifest.entry_point);
            println!("Files:       {}", manifest.files.len());
            println!("Chunks:      {}", manifest.chunk_infos().count());
            println!("Hash:        {}", manifest.manifest_hash);
            println!("Announced:   {} peer(s)", outcome.report.delivered.len());
        }
        Command::Claim { name } => match node.claim_name(&name).await? {
            ClaimOutcome::Claimed(claim) => {
                println!("Claimed {} ({})", claim.name, naming::encode(&claim.name)?);
            }
            ClaimOutcome::AlreadyClaimed(claim) => {
                bail!("{} is already claimed by {}", claim.name, claim.owner_address);
            }
        },
        Command::Resolve { address } => {
            let resolved = node.resolve(&address).await?;
            println!("App ID: {}", resolved.app_id);
            if let Some(name) = &resolved.name {
                println!("Name:   {}", name);
            }
            match &resolved.claim {
                Some(claim) => println!("Claim:  {}", claim.owner_address),
                None if resolved.name.is_some() => println!("Claim:  (none)"),
                None => {}
            }
            if let Some(path) = &resolved.path {
                println!("Path:   {}", path);
            }
        }
        Command::Load { address, out } => {
            let app = node.load(&address).await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &app.document)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("{} ({}) -> {}", app.path, app.mime_type, path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&app.document)?;
                }
            }
        }
        Command::Inspect { app_id } => {
            let Some(cached) = node.cache().peek_app(&app_id).await? else {
                bail!("{} is not cached", app_id);
            };
            let now = node.cache().now();
            let missing = node.cache().missing_chunks(&cached.manifest).await?;
            println!("{}", serde_json::to_string_pretty(&cached.manifest)?);
            println!();
            println!("Fresh:          {}", cached.is_fresh(now));
            println!("Missing chunks: {}", missing.len());
        }
        Command::Cleanup { max_cache } => {
            let budget = max_cache.or(config.max_chunk_cache_bytes);

            let cleaned = node.cleanup_expired().await?;
            println!(
                "Expired apps removed: {} ({} chunks)",
                cleaned.removed_apps.len(),
                cleaned.removed_chunks
            );
            if let Some(max) = budget {
                let evicted = node.cache().evict_chunks(max).await?;
                println!(
                    "Chunks evicted: {} ({} freed)",
                    evicted.evicted_chunks,
                    format_size(evicted.freed_bytes)
                );
                for app_id in &evicted.partial_apps {
                    println!("  partially cached: {}", app_id);
                }
            }
        }
        Command::Stats => {
            let stats = node.stats().await?;
            println!("=== Statistics ===");
            println!("Address:       {}", node.address());
            println!("Apps:          {}", stats.apps);
            println!("Chunks:        {} ({})", stats.chunks, format_size(stats.chunk_bytes));
            println!("State entries: {}", stats.state_entries);
        }
        Command::Encode { .. } | Command::Decode { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100"), Ok(100));
        assert_eq!(parse_size("1kb"), Ok(1024));
        assert_eq!(parse_size("1.5MB"), Ok(1024 * 1024 * 3 / 2));
        assert_eq!(parse_size("2 G"), Ok(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("0"), Ok(0));
        assert!(parse_size("ten").is_err());
        assert!(parse_size("5PB").is_err());
        assert!(parse_size("-1MB").is_err());
        assert!(parse_size("NaN").is_err());
    }

    #[test]
    fn test_cli_parses_cache_budget() {
        let cli = Cli::try_parse_from(["mooring", "cleanup", "--max-cache", "500MB"]).unwrap();
        assert!(matches!(cli.command, Command::Cleanup { max_cache: Some(n) } if n == 500 << 20));
        assert!(Cli::try_parse_from(["mooring", "cleanup", "--max-cache", "lots"]).is_err());
    }

    #[test]
    fn test_collect_files_uses_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>x</p>").unwrap();
        std::fs::write(dir.path().join("js").join("app.js"), "1").unwrap();

        let mut paths: Vec<String> = collect_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["index.html".to_string(), "js/app.js".to_string()]);
    }

    #[test]
    fn test_cli_parses_deploy() {
        let cli = Cli::try_parse_from([
            "mooring",
            "--db-path",
            "/tmp/m.db",
            "deploy",
            "./site",
            "--name",
            "chat",
            "--permission",
            "storage",
            "--permission",
            "broadcast",
        ])
        .unwrap();

        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/m.db")));
        match cli.command {
            Command::Deploy { name, permissions, .. } => {
                assert_eq!(name, "chat");
                assert_eq!(permissions, vec![Permission::Storage, Permission::Broadcast]);
            }
            _ => panic!("expected deploy"),
        }
    }
}
