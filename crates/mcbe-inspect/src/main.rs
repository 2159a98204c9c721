use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use mcbe_chunk::{BlobStore, ChunkColumn, ChunkConfig, ChunkFormat, KeyTag, WorldProvider};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "inspect.toml";

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.into());
    let config = if Path::new(&config_path).exists() {
        match ChunkConfig::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load {config_path}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        ChunkConfig::default()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = run(&config) {
        eprintln!("mcbe-inspect: {e}");
        std::process::exit(1);
    }
}

fn run(config: &ChunkConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "mcbe-inspect v{} opening {} (dimension {})",
        env!("CARGO_PKG_VERSION"),
        config.world.path,
        config.world.dimension
    );

    let target = config.chunk_format()?;
    info!(
        "Target chunk version {} (game {})",
        target.version,
        target.version.game_version()?
    );

    let registry = Arc::new(config.block_registry()?);
    info!("Block states: {}", registry.len());

    let mut provider = WorldProvider::open(
        Path::new(&config.world.path),
        config.world.dimension,
        registry,
    )?
    .with_strict_palette_size(config.codec.strict_palette_size);

    let keys = provider.keys()?;
    let columns: BTreeSet<(i32, i32)> = keys
        .iter()
        .filter(|k| k.dimension == config.world.dimension)
        .filter(|k| matches!(k.tag, KeyTag::Version | KeyTag::LegacyVersion))
        .map(|k| (k.x, k.z))
        .collect();
    info!("{} chunk records, {} columns", keys.len(), columns.len());

    let blobs = config.blob_store();
    let mut failed = 0usize;
    let mut outdated = 0usize;
    for (x, z) in columns {
        match provider.load_column(x, z, true) {
            Ok(Some(mut column)) => {
                if column.format().version < target.version {
                    outdated += 1;
                }
                print_summary(&mut column, &blobs, &target);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(x, z, error = %e, "failed to load chunk");
                failed += 1;
            }
        }
    }

    info!(
        "Blob cache holds {} of at most {} blobs",
        blobs.len(),
        blobs.capacity()
    );
    if outdated > 0 {
        info!("{outdated} columns predate chunk version {}", target.version);
    }
    if failed > 0 {
        warn!("{failed} columns could not be decoded");
    }
    Ok(())
}

fn print_summary(column: &mut ChunkColumn, blobs: &BlobStore, target: &ChunkFormat) {
    let version = column.format().version;
    let marker = if version < target.version { " (outdated)" } else { "" };
    let widths: Vec<String> = column
        .sections()
        .map(|sub| {
            let bits = sub.bits_per_block(0).unwrap_or(0);
            format!("{}:{}", sub.y(), bits)
        })
        .collect();

    let payload = match column.network_encode_no_cache() {
        Ok(bytes) => bytes.len().to_string(),
        Err(e) => format!("error ({e})"),
    };
    let cached = match column.network_encode_with_cache(blobs) {
        Ok((hashes, bytes)) => format!("{} blobs + {} bytes", hashes.len(), bytes.len()),
        Err(e) => format!("error ({e})"),
    };

    println!(
        "chunk {} version {}{} sections {} [{}] block entities {} entities {} payload {} cached {}",
        column.pos(),
        version,
        marker,
        column.section_count(),
        widths.join(" "),
        column.block_entities().count(),
        column.entities().len(),
        payload,
        cached,
    );
}
