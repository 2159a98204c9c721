//! Bedrock wire primitives shared by the NBT and chunk crates.

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{ProtoDecode, ProtoEncode};
pub use error::ProtoError;
pub use types::{BlockPos, ChunkPos, VarInt, VarLong, VarUInt32};
