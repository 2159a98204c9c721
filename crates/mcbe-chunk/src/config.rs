use serde::Deserialize;
use std::path::Path;

use crate::blob_store::{BlobStore, DEFAULT_CAPACITY};
use crate::error::ChunkError;
use crate::registry::BlockRegistry;
use crate::version::{ChunkFormat, ChunkVersion};

#[derive(Debug, Default, Deserialize)]
pub struct ChunkConfig {
    #[serde(default)]
    pub world: WorldSection,
    #[serde(default)]
    pub codec: CodecSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct WorldSection {
    /// Directory holding the LevelDB files (a world's `db/`).
    #[serde(default = "default_world_path")]
    pub path: String,
    /// 0 overworld, 1 nether, 2 the end.
    #[serde(default)]
    pub dimension: i32,
    /// Game release whose chunk layout new columns use, e.g. "1.18.30".
    #[serde(default = "default_game_version")]
    pub game_version: String,
    /// Optional JSON block-state table. Only air is known without one.
    #[serde(default)]
    pub block_states: Option<String>,
}

fn default_world_path() -> String {
    "world/db".into()
}

fn default_game_version() -> String {
    "1.18.30".into()
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            path: default_world_path(),
            dimension: 0,
            game_version: default_game_version(),
            block_states: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CodecSection {
    /// Reject persisted palettes shorter than their declared size.
    #[serde(default = "default_true")]
    pub strict_palette_size: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            strict_palette_size: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl ChunkConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    /// Layout for columns created with the configured game version.
    pub fn chunk_format(&self) -> Result<ChunkFormat, ChunkError> {
        let version = ChunkVersion::from_game_version(&self.world.game_version)?;
        Ok(ChunkFormat::for_version(version)
            .with_strict_palette_size(self.codec.strict_palette_size))
    }

    pub fn blob_store(&self) -> BlobStore {
        BlobStore::new(self.cache.capacity)
    }

    /// Block states from `world.block_states`, or an air-only registry.
    pub fn block_registry(&self) -> Result<BlockRegistry, Box<dyn std::error::Error>> {
        match &self.world.block_states {
            Some(path) => {
                let json = std::fs::read_to_string(path)?;
                Ok(BlockRegistry::from_json(&json)?)
            }
            None => Ok(BlockRegistry::new()),
        }
    }
}
