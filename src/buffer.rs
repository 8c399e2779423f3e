//! Buffer Store: decoded payloads keyed by stream identity, then index.

use std::collections::{BTreeMap, HashMap};

use crate::{
    codec::{MeshPayload, TexturePayload},
    manifest::TextureType,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryStreamKey {
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureStreamKey {
    pub channel: TextureType,
    pub tag: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKey {
    Geometry(GeometryStreamKey),
    Texture(TextureStreamKey),
}

/// One buffer slot: a geometry frame or a texture segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub stream: StreamKey,
    pub index: u32,
}

impl Slot {
    pub fn geometry(target: &str, index: u32) -> Self {
        Self {
            stream: StreamKey::Geometry(GeometryStreamKey {
                target: target.to_string(),
            }),
            index,
        }
    }

    pub fn texture(channel: TextureType, tag: &str, target: &str, index: u32) -> Self {
        Self {
            stream: StreamKey::Texture(TextureStreamKey {
                channel,
                tag: tag.to_string(),
                target: target.to_string(),
            }),
            index,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Mesh(MeshPayload),
    Texture(TexturePayload),
}

/// Holds only completed decodes. Dropping an entry releases its payload.
#[derive(Debug, Default)]
pub struct BufferStore {
    geometry: HashMap<GeometryStreamKey, BTreeMap<u32, MeshPayload>>,
    textures: HashMap<TextureStreamKey, BTreeMap<u32, TexturePayload>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload under `slot`. A mismatched payload kind is ignored.
    pub fn insert(&mut self, slot: Slot, payload: Payload) -> bool {
        match (slot.stream, payload) {
            (StreamKey::Geometry(key), Payload::Mesh(mesh)) => {
                self.geometry.entry(key).or_default().insert(slot.index, mesh);
                true
            }
            (StreamKey::Texture(key), Payload::Texture(texture)) => {
                self.textures
                    .entry(key)
                    .or_default()
                    .insert(slot.index, texture);
                true
            }
            _ => false,
        }
    }

    pub fn geometry(&self, key: &GeometryStreamKey, frame: u32) -> Option<&MeshPayload> {
        self.geometry.get(key)?.get(&frame)
    }

    pub fn texture(&self, key: &TextureStreamKey, segment: u32) -> Option<&TexturePayload> {
        self.textures.get(key)?.get(&segment)
    }

    pub fn contains(&self, slot: &Slot) -> bool {
        match &slot.stream {
            StreamKey::Geometry(key) => self.geometry(key, slot.index).is_some(),
            StreamKey::Texture(key) => self.texture(key, slot.index).is_some(),
        }
    }

    /// Geometry frames of `key` buffered at or after `from`.
    pub fn geometry_ahead(&self, key: &GeometryStreamKey, from: u32) -> usize {
        self.geometry
            .get(key)
            .map(|frames| frames.range(from..).count())
            .unwrap_or(0)
    }

    pub fn geometry_len(&self) -> usize {
        self.geometry.values().map(BTreeMap::len).sum()
    }

    pub fn texture_len(&self) -> usize {
        self.textures.values().map(BTreeMap::len).sum()
    }

    pub fn geometry_streams(&self) -> impl Iterator<Item = &GeometryStreamKey> {
        self.geometry.keys()
    }

    /// Drop geometry frames below the floor `floor_of` returns for each stream.
    pub fn evict_geometry(&mut self, floor_of: impl Fn(&GeometryStreamKey) -> u32) -> usize {
        let mut evicted = 0;
        for (key, frames) in self.geometry.iter_mut() {
            evicted += evict_below(frames, floor_of(key));
        }
        self.geometry.retain(|_, frames| !frames.is_empty());
        evicted
    }

    /// Drop texture segments below the floor `floor_of` returns for each stream.
    pub fn evict_textures(&mut self, floor_of: impl Fn(&TextureStreamKey) -> u32) -> usize {
        let mut evicted = 0;
        for (key, segments) in self.textures.iter_mut() {
            evicted += evict_below(segments, floor_of(key));
        }
        self.textures.retain(|_, segments| !segments.is_empty());
        evicted
    }

    pub fn clear(&mut self) {
        self.geometry.clear();
        self.textures.clear();
    }
}

fn evict_below<T>(entries: &mut BTreeMap<u32, T>, floor: u32) -> usize {
    let kept = entries.split_off(&floor);
    std::mem::replace(entries, kept).len()
}
