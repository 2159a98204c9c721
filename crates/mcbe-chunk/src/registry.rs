//! Block state registry: runtime id <-> name + state properties.
//!
//! The registry is built once per game version and shared between columns
//! through an `Arc`. Runtime ids are the index of the state in the table.

use std::collections::{BTreeMap, HashMap};

use mcbe_nbt::{NbtCompound, NbtTag};
use serde::Deserialize;

use crate::error::ChunkError;
use crate::palette::PaletteEntry;

pub const AIR: &str = "minecraft:air";

/// Block state version stamped on entries that do not carry one (1.18.0).
pub const DEFAULT_STATE_VERSION: i32 = 17_959_425;

/// Property value as stored in a block state's `states` compound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateValue {
    Byte(i8),
    Int(i32),
    Str(String),
}

impl StateValue {
    pub fn to_nbt(&self) -> NbtTag {
        match self {
            StateValue::Byte(v) => NbtTag::Byte(*v),
            StateValue::Int(v) => NbtTag::Int(*v),
            StateValue::Str(v) => NbtTag::String(v.clone()),
        }
    }

    pub fn from_nbt(tag: &NbtTag) -> Option<Self> {
        match tag {
            NbtTag::Byte(v) => Some(StateValue::Byte(*v)),
            NbtTag::Int(v) => Some(StateValue::Int(*v)),
            NbtTag::String(v) => Some(StateValue::Str(v.clone())),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for StateValue {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        // JSON tables spell byte flags as booleans.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i32),
            Str(String),
        }
        Ok(match Raw::deserialize(de)? {
            Raw::Bool(b) => StateValue::Byte(b as i8),
            Raw::Int(v) => StateValue::Int(v),
            Raw::Str(s) => StateValue::Str(s),
        })
    }
}

pub type StateProperties = BTreeMap<String, StateValue>;

/// Convert a `states` compound. Tags with no [`StateValue`] form are rejected.
pub fn properties_from_nbt(states: &NbtCompound) -> Option<StateProperties> {
    states
        .iter()
        .map(|(k, v)| StateValue::from_nbt(v).map(|v| (k.clone(), v)))
        .collect()
}

pub fn properties_to_nbt(properties: &StateProperties) -> NbtCompound {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), v.to_nbt()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockState {
    pub name: String,
    #[serde(default, rename = "states")]
    pub properties: StateProperties,
    #[serde(default = "default_version")]
    pub version: i32,
}

fn default_version() -> i32 {
    DEFAULT_STATE_VERSION
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: StateProperties::new(),
            version: DEFAULT_STATE_VERSION,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: StateValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

fn namespaced(name: &str) -> String {
    if name.contains(':') {
        name.to_owned()
    } else {
        format!("minecraft:{name}")
    }
}

#[derive(Debug, Clone)]
pub struct BlockRegistry {
    states: Vec<BlockState>,
    by_state: HashMap<(String, StateProperties), u32>,
    air: u32,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    /// Registry holding only `minecraft:air` (runtime id 0).
    pub fn new() -> Self {
        Self::from_states(Vec::new())
    }

    /// Build from an ordered state table. Air is appended if the table lacks it.
    pub fn from_states(states: Vec<BlockState>) -> Self {
        let mut registry = Self {
            states: Vec::with_capacity(states.len() + 1),
            by_state: HashMap::with_capacity(states.len() + 1),
            air: 0,
        };
        for state in states {
            registry.register(state);
        }
        registry.air = match registry.runtime_id(AIR, &StateProperties::new()) {
            Some(id) => id,
            None => registry.register(BlockState::new(AIR)),
        };
        registry
    }

    /// Parse a JSON array of `{"name", "states", "version"}` objects.
    pub fn from_json(json: &str) -> Result<Self, ChunkError> {
        let states: Vec<BlockState> = serde_json::from_str(json)?;
        Ok(Self::from_states(states))
    }

    /// Add a state, returning its runtime id. Re-registering returns the existing id.
    pub fn register(&mut self, mut state: BlockState) -> u32 {
        state.name = namespaced(&state.name);
        let key = (state.name.clone(), state.properties.clone());
        if let Some(&id) = self.by_state.get(&key) {
            return id;
        }
        let id = self.states.len() as u32;
        self.states.push(state);
        self.by_state.insert(key, id);
        id
    }

    pub fn air_id(&self) -> u32 {
        self.air
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, runtime_id: u32) -> Option<&BlockState> {
        self.states.get(runtime_id as usize)
    }

    pub fn runtime_id(&self, name: &str, properties: &StateProperties) -> Option<u32> {
        self.by_state
            .get(&(namespaced(name), properties.clone()))
            .copied()
    }

    /// Palette entry for a runtime id.
    pub fn entry(&self, runtime_id: u32) -> Result<PaletteEntry, ChunkError> {
        let state = self
            .state(runtime_id)
            .ok_or(ChunkError::UnknownRuntimeId(runtime_id))?;
        Ok(PaletteEntry {
            global_id: runtime_id,
            name: state.name.clone(),
            properties: state.properties.clone(),
            version: state.version,
        })
    }

    /// Resolve a persisted `{name, states, version}` compound to a palette entry.
    ///
    /// The entry keeps the compound's own `version`, falling back to the
    /// registry's when absent.
    pub fn entry_from_nbt(&self, compound: &NbtCompound) -> Result<PaletteEntry, ChunkError> {
        let name = compound
            .get("name")
            .and_then(NbtTag::as_string)
            .ok_or_else(|| ChunkError::UnknownBlockState {
                name: "<unnamed>".into(),
            })?;
        let properties = match compound.get("states").and_then(NbtTag::as_compound) {
            Some(states) => properties_from_nbt(states).ok_or_else(|| {
                ChunkError::UnknownBlockState {
                    name: name.to_owned(),
                }
            })?,
            None => StateProperties::new(),
        };
        let global_id = self
            .runtime_id(name, &properties)
            .ok_or_else(|| ChunkError::UnknownBlockState {
                name: name.to_owned(),
            })?;
        let version = compound
            .get("version")
            .and_then(NbtTag::as_int)
            .or_else(|| self.state(global_id).map(|s| s.version))
            .unwrap_or(DEFAULT_STATE_VERSION);
        Ok(PaletteEntry {
            global_id,
            name: namespaced(name),
            properties,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"[
        {"name": "minecraft:air"},
        {"name": "minecraft:stone", "states": {"stone_type": "stone"}, "version": 17959425},
        {"name": "minecraft:stone", "states": {"stone_type": "granite"}, "version": 17959425},
        {"name": "minecraft:oak_door", "states": {"direction": 1, "open_bit": true, "upper_block_bit": false}}
    ]"#;

    #[test]
    fn ids_follow_table_order() {
        let registry = BlockRegistry::from_json(TABLE).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.air_id(), 0);
        let granite = StateProperties::from([(
            "stone_type".to_owned(),
            StateValue::Str("granite".into()),
        )]);
        assert_eq!(registry.runtime_id("minecraft:stone", &granite), Some(2));
        assert_eq!(registry.runtime_id("stone", &granite), Some(2));
    }

    #[test]
    fn json_booleans_become_bytes() {
        let registry = BlockRegistry::from_json(TABLE).unwrap();
        let door = registry.state(3).unwrap();
        assert_eq!(door.properties["open_bit"], StateValue::Byte(1));
        assert_eq!(door.properties["upper_block_bit"], StateValue::Byte(0));
        assert_eq!(door.properties["direction"], StateValue::Int(1));
        assert_eq!(door.version, DEFAULT_STATE_VERSION);
    }

    #[test]
    fn air_is_always_present() {
        let mut registry = BlockRegistry::from_states(vec![BlockState::new("minecraft:stone")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.air_id(), 1);
        assert_eq!(registry.state(1).unwrap().name, AIR);
        assert_eq!(registry.register(BlockState::new("stone")), 0);
    }

    #[test]
    fn unknown_runtime_id() {
        let registry = BlockRegistry::new();
        assert!(matches!(
            registry.entry(7),
            Err(ChunkError::UnknownRuntimeId(7))
        ));
    }

    #[test]
    fn nbt_entry_resolution() {
        let registry = BlockRegistry::from_json(TABLE).unwrap();
        let mut states = NbtCompound::new();
        states.insert("stone_type".into(), NbtTag::String("granite".into()));
        let mut compound = NbtCompound::new();
        compound.insert("name".into(), NbtTag::String("minecraft:stone".into()));
        compound.insert("states".into(), NbtTag::Compound(states.clone()));
        compound.insert("version".into(), NbtTag::Int(17_825_808));

        let entry = registry.entry_from_nbt(&compound).unwrap();
        assert_eq!(entry.global_id, 2);
        assert_eq!(entry.version, 17_825_808);

        states.insert("stone_type".into(), NbtTag::String("basalt".into()));
        compound.insert("states".into(), NbtTag::Compound(states));
        assert!(matches!(
            registry.entry_from_nbt(&compound),
            Err(ChunkError::UnknownBlockState { .. })
        ));
    }

    #[test]
    fn properties_nbt_conversion() {
        let props = StateProperties::from([
            ("age".to_owned(), StateValue::Int(3)),
            ("lit".to_owned(), StateValue::Byte(1)),
        ]);
        let nbt = properties_to_nbt(&props);
        assert_eq!(nbt["age"], NbtTag::Int(3));
        assert_eq!(properties_from_nbt(&nbt), Some(props));

        let mut odd = NbtCompound::new();
        odd.insert("weird".into(), NbtTag::Long(1));
        assert_eq!(properties_from_nbt(&odd), None);
    }
}
