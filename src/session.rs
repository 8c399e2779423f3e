//! Track Session: all mutable state of the track that is currently playing.
//!
//! One session exists per loaded track. The scheduler, the ABR controller and
//! the compositor all work against it through the player's `Shared` handle.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    abr::{self, AbrController, AbrDecision},
    buffer::{BufferStore, GeometryStreamKey, TextureStreamKey},
    clock::{TimeBase, frame_at},
    codec::{BoundingVolume, MeshPayload, TextureCapabilities},
    common::{
        errors::{ManifestError, UnsupportedFormatError},
        types::SessionId,
    },
    configs::AbrConfig,
    manifest::{GeometryTarget, Manifest, TextureTarget, TextureType},
    scheduler::RetryLedger,
    selector,
};

/// Bounds of the first decoded mesh are grown by this factor and reused.
pub const BOUNDS_MARGIN: f32 = 1.1;

/// Nothing requested yet.
pub const NO_HIGH_WATER: i64 = -1;

/// Target choice and request progress for one texture channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel: TextureType,
    /// Renderable targets in selection order. Empty when none is renderable.
    pub candidates: Vec<String>,
    pub active: Option<usize>,
    pub tag: String,
    high_water: HashMap<String, i64>,
}

impl ChannelState {
    pub fn active_target(&self) -> Option<&str> {
        self.active
            .and_then(|i| self.candidates.get(i))
            .map(String::as_str)
    }

    /// Highest segment requested for `target`, [`NO_HIGH_WATER`] if none.
    pub fn high_water(&self, target: &str) -> i64 {
        self.high_water.get(target).copied().unwrap_or(NO_HIGH_WATER)
    }

    pub fn raise_high_water(&mut self, target: &str, index: u32) {
        let mark = self.high_water.entry(target.to_string()).or_insert(NO_HIGH_WATER);
        *mark = (*mark).max(index as i64);
    }

    pub fn stream_key(&self, target: &str) -> TextureStreamKey {
        TextureStreamKey {
            channel: self.channel,
            tag: self.tag.clone(),
            target: target.to_string(),
        }
    }
}

pub struct TrackSession {
    pub id: SessionId,
    pub manifest: Arc<Manifest>,
    /// Base for resolving relative paths in the manifest.
    pub manifest_url: String,
    pub has_audio: bool,
    pub clock: TimeBase,
    pub geometry_target: String,
    pub geometry_high_water: i64,
    pub channels: BTreeMap<TextureType, ChannelState>,
    pub buffers: BufferStore,
    pub abr: AbrController,
    pub unsupported: Vec<UnsupportedFormatError>,
    pub retry: RetryLedger,
    pub ended: bool,
    bounds: Option<BoundingVolume>,
}

impl TrackSession {
    pub fn new(
        manifest: Arc<Manifest>,
        manifest_url: &str,
        clock: TimeBase,
        capabilities: &dyn TextureCapabilities,
        abr_config: AbrConfig,
    ) -> Result<Self, ManifestError> {
        let geometry_target = selector::choose_geometry_target(&manifest.geometry)
            .ok_or(ManifestError::MissingGeometry)?;

        let mut channels = BTreeMap::new();
        let mut unsupported = Vec::new();
        for (channel, texture) in &manifest.textures {
            let candidates =
                match selector::choose_texture_targets(*channel, &texture.targets, capabilities) {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        warn!("{}; showing placeholder material", e);
                        unsupported.push(e);
                        Vec::new()
                    }
                };

            channels.insert(
                *channel,
                ChannelState {
                    channel: *channel,
                    active: (!candidates.is_empty()).then_some(0),
                    candidates,
                    tag: selector::choose_tag(texture),
                    high_water: HashMap::new(),
                },
            );
        }

        let session = Self {
            id: SessionId::generate(),
            has_audio: clock.is_audio_backed(),
            manifest,
            manifest_url: manifest_url.to_string(),
            clock,
            geometry_target,
            geometry_high_water: NO_HIGH_WATER,
            channels,
            buffers: BufferStore::new(),
            abr: AbrController::new(abr_config),
            unsupported,
            retry: RetryLedger::default(),
            ended: false,
            bounds: None,
        };

        info!(
            "[{}] session ready: geometry={} baseColor={:?} audio={}",
            session.id,
            session.geometry_target,
            session.active_texture_target(TextureType::BaseColor),
            session.has_audio
        );
        Ok(session)
    }

    pub fn geometry(&self) -> Option<&GeometryTarget> {
        self.manifest.geometry_target(&self.geometry_target)
    }

    pub fn geometry_key(&self) -> GeometryStreamKey {
        GeometryStreamKey {
            target: self.geometry_target.clone(),
        }
    }

    pub fn active_texture_target(&self, channel: TextureType) -> Option<&str> {
        self.channels.get(&channel)?.active_target()
    }

    pub fn texture_target(&self, key: &TextureStreamKey) -> Option<&TextureTarget> {
        self.manifest.texture_target(key.channel, &key.target)
    }

    /// Frames in the track, as defined by `baseColor`.
    pub fn end_frame_count(&self) -> u32 {
        let base = self.manifest.textures.get(&TextureType::BaseColor);
        let active = self
            .active_texture_target(TextureType::BaseColor)
            .and_then(|name| base?.targets.get(name));

        match active {
            Some(target) => target.frame_count,
            None => base
                .and_then(|b| b.targets.values().map(|t| t.frame_count).max())
                .unwrap_or(0),
        }
    }

    /// `baseColor` frame at `time`, on the active target's rate.
    pub fn base_frame_at(&self, time: f64) -> u32 {
        let base = self.manifest.textures.get(&TextureType::BaseColor);
        let rate = self
            .active_texture_target(TextureType::BaseColor)
            .and_then(|name| base?.targets.get(name))
            .or_else(|| base.and_then(|b| b.targets.values().next()))
            .map(|t| t.frame_rate)
            .unwrap_or(0.0);
        frame_at(time, rate)
    }

    /// Move the `baseColor` target one step. Buffered segments of the old
    /// target are left to age out.
    pub fn apply_abr(&mut self, decision: AbrDecision) -> bool {
        let Some(state) = self.channels.get_mut(&TextureType::BaseColor) else {
            return false;
        };
        let Some(active) = state.active else {
            return false;
        };

        let next = abr::step(decision, active, state.candidates.len());
        if next == active {
            return false;
        }

        info!(
            "[{}] baseColor target {} -> {}",
            self.id, state.candidates[active], state.candidates[next]
        );
        state.active = Some(next);
        true
    }

    /// Stamp the cached bounding volume onto `mesh`, caching the first one seen.
    pub fn stamp_bounds(&mut self, mesh: &mut MeshPayload) {
        if self.bounds.is_none() {
            self.bounds = mesh.bounds.map(|b| b.enlarged(BOUNDS_MARGIN));
        }
        if self.bounds.is_some() {
            mesh.bounds = self.bounds;
        }
    }

    pub fn status(&self, now: Instant) -> SessionStatus {
        SessionStatus {
            session: self.id,
            paused: self.clock.is_paused(),
            ended: self.ended,
            current_time: self.clock.current_time(now),
            geometry_target: self.geometry_target.clone(),
            geometry_high_water: self.geometry_high_water,
            texture_targets: self
                .channels
                .iter()
                .map(|(channel, state)| {
                    (
                        channel.as_str().to_string(),
                        state.active_target().map(str::to_string),
                    )
                })
                .collect(),
            buffered_geometry: self.buffers.geometry_len(),
            buffered_textures: self.buffers.texture_len(),
        }
    }
}

/// Snapshot of a live session for logs and status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session: SessionId,
    pub paused: bool,
    pub ended: bool,
    pub current_time: f64,
    pub geometry_target: String,
    pub geometry_high_water: i64,
    pub texture_targets: BTreeMap<String, Option<String>>,
    pub buffered_geometry: usize,
    pub buffered_textures: usize,
}
