//! Chunk format revisions and the per-revision layout rules.

use std::fmt;

use crate::error::ChunkError;

/// Chunk version byte as stored under the `Version` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkVersion(pub u8);

impl ChunkVersion {
    pub const V0_9_00: Self = Self(0);
    pub const V0_9_02: Self = Self(1);
    pub const V0_9_05: Self = Self(2);
    pub const V0_17_0: Self = Self(3);
    pub const V0_18_0: Self = Self(4);
    pub const V_CONSOLE1_TO_V0_18_0: Self = Self(5);
    pub const V1_2_0: Self = Self(6);
    pub const V1_2_0_BIS: Self = Self(7);
    pub const V1_4_0: Self = Self(8);
    pub const V1_8_0: Self = Self(9);
    pub const V1_9_0: Self = Self(10);
    pub const V1_10_0: Self = Self(11);
    pub const V1_11_0: Self = Self(12);
    pub const V1_11_1: Self = Self(13);
    pub const V1_11_2: Self = Self(14);
    pub const V1_12_0: Self = Self(15);
    pub const V1_15_0: Self = Self(16);
    pub const V1_15_1: Self = Self(17);
    pub const V1_16_0: Self = Self(18);
    pub const V1_16_1: Self = Self(19);
    pub const V1_16_100: Self = Self(20);
    pub const V1_16_200: Self = Self(21);
    /// Caves and cliffs experiment disabled.
    pub const V1_16_210: Self = Self(22);
    pub const V1_17_0: Self = Self(25);
    pub const V1_17_30: Self = Self(29);
    pub const V1_17_40: Self = Self(31);
    pub const V1_18_0: Self = Self(39);
    pub const V1_18_30: Self = Self(40);

    pub const LATEST: Self = Self::V1_18_30;

    /// Oldest game release per chunk version, newest first.
    const RELEASES: [((u16, u16, u16), ChunkVersion); 20] = [
        ((1, 18, 30), Self::V1_18_30),
        ((1, 18, 0), Self::V1_18_0),
        ((1, 17, 40), Self::V1_17_40),
        ((1, 17, 30), Self::V1_17_30),
        ((1, 17, 0), Self::V1_17_0),
        ((1, 16, 210), Self::V1_16_210),
        ((1, 16, 200), Self::V1_16_200),
        ((1, 16, 100), Self::V1_16_100),
        ((1, 16, 1), Self::V1_16_1),
        ((1, 16, 0), Self::V1_16_0),
        ((1, 15, 1), Self::V1_15_1),
        ((1, 15, 0), Self::V1_15_0),
        ((1, 12, 0), Self::V1_12_0),
        ((1, 11, 2), Self::V1_11_2),
        ((1, 11, 1), Self::V1_11_1),
        ((1, 11, 0), Self::V1_11_0),
        ((1, 10, 0), Self::V1_10_0),
        ((1, 9, 0), Self::V1_9_0),
        ((1, 8, 0), Self::V1_8_0),
        ((1, 4, 0), Self::V1_4_0),
    ];

    /// Chunk version written by a game release, e.g. `"1.17.10"` or `"bedrock_1.18.0"`.
    pub fn from_game_version(version: &str) -> Result<Self, ChunkError> {
        let unknown = || ChunkError::UnknownChunkVersion(version.to_owned());
        let trimmed = version.strip_prefix("bedrock_").unwrap_or(version);
        let mut parts = trimmed.split('.').map(str::parse::<u16>);
        let mut next = || parts.next().unwrap_or(Ok(0)).map_err(|_| unknown());
        let release = (next()?, next()?, next()?);
        Self::RELEASES
            .iter()
            .find(|(min, _)| release >= *min)
            .map(|&(_, v)| v)
            .ok_or_else(unknown)
    }

    /// Game release that introduced this chunk version.
    ///
    /// `V1_16_210` reports "1.16.210" although it decodes with the 1.17.0 layout.
    pub fn game_version(self) -> Result<String, ChunkError> {
        Self::RELEASES
            .iter()
            .filter(|(min, _)| *min >= (1, 11, 0))
            .find(|(_, v)| self >= *v)
            .map(|((a, b, c), _)| format!("{a}.{b}.{c}"))
            .ok_or_else(|| ChunkError::UnknownChunkVersion(self.0.to_string()))
    }
}

impl fmt::Display for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiomeLayout {
    /// One byte per column, 256 bytes.
    Legacy2D,
    /// One paletted 16x16x16 section per sub-chunk.
    Paletted3D,
}

/// How the border block count in a chunk payload is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderEncoding {
    Byte,
    VarUInt32,
}

/// Layout rules for one chunk version, resolved once per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFormat {
    pub version: ChunkVersion,
    pub sub_chunk_version: u8,
    pub min_section: i8,
    pub max_section: i8,
    pub biome_layout: BiomeLayout,
    pub border_encoding: BorderEncoding,
    /// Fail when a persisted palette holds fewer entries than declared.
    pub strict_palette_size: bool,
}

impl ChunkFormat {
    pub fn for_version(version: ChunkVersion) -> Self {
        let caves_and_cliffs = version >= ChunkVersion::V1_17_30;
        let v1_18 = version >= ChunkVersion::V1_18_0;
        Self {
            version,
            sub_chunk_version: if caves_and_cliffs { 9 } else { 8 },
            min_section: if caves_and_cliffs { -4 } else { 0 },
            max_section: if caves_and_cliffs { 19 } else { 15 },
            biome_layout: if v1_18 {
                BiomeLayout::Paletted3D
            } else {
                BiomeLayout::Legacy2D
            },
            border_encoding: if v1_18 {
                BorderEncoding::VarUInt32
            } else {
                BorderEncoding::Byte
            },
            strict_palette_size: true,
        }
    }

    pub fn with_strict_palette_size(mut self, strict: bool) -> Self {
        self.strict_palette_size = strict;
        self
    }

    /// Number of vertical section slots.
    pub fn section_span(&self) -> usize {
        (self.max_section as i32 - self.min_section as i32 + 1) as usize
    }

    pub fn contains_section(&self, y: i32) -> bool {
        (self.min_section as i32..=self.max_section as i32).contains(&y)
    }

    /// Lowest block y in the column.
    pub fn min_block_y(&self) -> i32 {
        self.min_section as i32 * 16
    }

    pub fn max_block_y(&self) -> i32 {
        self.max_section as i32 * 16 + 15
    }
}

impl Default for ChunkFormat {
    fn default() -> Self {
        Self::for_version(ChunkVersion::LATEST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_version_lookup() {
        let cases = [
            ("1.16.201", ChunkVersion::V1_16_200),
            ("1.16.220", ChunkVersion::V1_16_210),
            ("1.17.10", ChunkVersion::V1_17_0),
            ("bedrock_1.17.30", ChunkVersion::V1_17_30),
            ("1.17.40", ChunkVersion::V1_17_40),
            ("1.18.0", ChunkVersion::V1_18_0),
            ("1.20.80", ChunkVersion::V1_18_30),
            ("1.12", ChunkVersion::V1_12_0),
        ];
        for (game, chunk) in cases {
            assert_eq!(ChunkVersion::from_game_version(game).unwrap(), chunk, "{game}");
        }
        assert!(ChunkVersion::from_game_version("1.2.0").is_err());
        assert!(ChunkVersion::from_game_version("latest").is_err());
    }

    #[test]
    fn chunk_version_back_to_game() {
        assert_eq!(ChunkVersion::V1_18_0.game_version().unwrap(), "1.18.0");
        assert_eq!(ChunkVersion(23).game_version().unwrap(), "1.16.210");
        assert_eq!(ChunkVersion::V1_16_210.game_version().unwrap(), "1.16.210");
        assert_eq!(
            ChunkFormat::for_version(ChunkVersion::V1_16_210).sub_chunk_version,
            ChunkFormat::for_version(ChunkVersion::V1_17_0).sub_chunk_version
        );
        assert_eq!(ChunkVersion::V1_11_0.game_version().unwrap(), "1.11.0");
        assert!(ChunkVersion::V1_10_0.game_version().is_err());
    }

    #[test]
    fn format_boundaries() {
        let old = ChunkFormat::for_version(ChunkVersion::V1_17_0);
        assert_eq!(old.sub_chunk_version, 8);
        assert_eq!((old.min_section, old.max_section), (0, 15));
        assert_eq!(old.section_span(), 16);
        assert_eq!(old.biome_layout, BiomeLayout::Legacy2D);

        let cliffs = ChunkFormat::for_version(ChunkVersion::V1_17_30);
        assert_eq!(cliffs.sub_chunk_version, 9);
        assert_eq!(cliffs.section_span(), 24);
        assert_eq!(cliffs.biome_layout, BiomeLayout::Legacy2D);
        assert_eq!(cliffs.border_encoding, BorderEncoding::Byte);

        let modern = ChunkFormat::for_version(ChunkVersion::V1_18_0);
        assert_eq!(modern.biome_layout, BiomeLayout::Paletted3D);
        assert_eq!(modern.border_encoding, BorderEncoding::VarUInt32);
        assert_eq!((modern.min_block_y(), modern.max_block_y()), (-64, 319));
        assert!(modern.contains_section(-4));
        assert!(!modern.contains_section(20));
    }
}
