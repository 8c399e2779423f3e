//! Frame Compositor: turns the clock and the buffer store into one
//! presentation directive per render tick.

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{
    buffer::TextureStreamKey,
    clock::frame_at,
    codec::{MeshPayload, TexturePayload},
    configs::PlayerConfig,
    manifest::TextureType,
    session::{ChannelState, TrackSession},
};

/// Where a channel's texture for this frame came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureSource {
    Active,
    /// Another target of the same tag had the frame buffered.
    Fallback,
    /// Nothing decoded yet; the "decode pending" material is shown.
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct ChannelFrame {
    pub channel: TextureType,
    pub source: TextureSource,
    /// Target the texture came from. `None` for a placeholder.
    pub target: Option<String>,
    pub texture: Option<TexturePayload>,
    pub segment: u32,
    /// Offset of the current frame inside its segment.
    pub sub_frame: u32,
}

#[derive(Debug, Clone)]
pub struct Presentation {
    pub frame: u32,
    pub mesh: MeshPayload,
    pub textures: Vec<ChannelFrame>,
}

impl Presentation {
    pub fn channel(&self, channel: TextureType) -> Option<&ChannelFrame> {
        self.textures.iter().find(|c| c.channel == channel)
    }
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Paused; fraction of the lookahead window already buffered.
    Buffering(f32),
    /// Geometry for `frame` is not decoded yet; nothing is shown.
    Waiting { frame: u32 },
    Shown(Presentation),
    Ended,
}

pub fn tick(session: &mut TrackSession, now: Instant, config: &PlayerConfig) -> TickOutcome {
    if session.ended {
        return TickOutcome::Ended;
    }

    let time = session.clock.current_time(now);
    if session.clock.ended() {
        debug!("[{}] audio ended at {:.2}s", session.id, time);
        session.ended = true;
        return TickOutcome::Ended;
    }
    if session.clock.is_paused() {
        return TickOutcome::Buffering(buffering_progress(session, time, config));
    }

    if session.base_frame_at(time) >= session.end_frame_count() {
        debug!("[{}] reached end of track at {:.2}s", session.id, time);
        session.ended = true;
        return TickOutcome::Ended;
    }

    let outcome = present(session, time);
    evict(session, time, config.retention_margin);
    outcome
}

fn buffering_progress(session: &TrackSession, time: f64, config: &PlayerConfig) -> f32 {
    let Some(target) = session.geometry() else {
        return 0.0;
    };
    let wanted = config.buffer_duration_secs as f64 * target.frame_rate;
    if wanted <= 0.0 {
        return 1.0;
    }

    let cursor = frame_at(time, target.frame_rate);
    let buffered = session.buffers.geometry_ahead(&session.geometry_key(), cursor);
    (buffered as f64 / wanted).clamp(0.0, 1.0) as f32
}

fn present(session: &mut TrackSession, time: f64) -> TickOutcome {
    let Some(geometry) = session.geometry() else {
        return TickOutcome::Waiting { frame: 0 };
    };
    let frame = frame_at(time, geometry.frame_rate).min(geometry.last_frame());

    let Some(mesh) = session.buffers.geometry(&session.geometry_key(), frame) else {
        trace!("[{}] geometry {} not ready", session.id, frame);
        return TickOutcome::Waiting { frame };
    };
    let mut mesh = mesh.clone();

    let textures = session
        .channels
        .values()
        .map(|state| resolve_texture(session, state, time))
        .collect();

    session.stamp_bounds(&mut mesh);
    TickOutcome::Shown(Presentation {
        frame,
        mesh,
        textures,
    })
}

/// Active target first, then the other renderable targets in selection order.
fn resolve_texture(session: &TrackSession, state: &ChannelState, time: f64) -> ChannelFrame {
    let active = state.active_target();
    let ordered = active
        .into_iter()
        .chain(state.candidates.iter().map(String::as_str).filter(|n| Some(*n) != active));

    for name in ordered {
        let key = state.stream_key(name);
        let Some(target) = session.texture_target(&key) else {
            continue;
        };
        let frame = frame_at(time, target.frame_rate).min(target.frame_count.saturating_sub(1));
        let segment = target.segment_of(frame);

        if let Some(texture) = session.buffers.texture(&key, segment) {
            let source = if Some(name) == active {
                TextureSource::Active
            } else {
                trace!("[{}] {} falling back to {}", session.id, state.channel, name);
                TextureSource::Fallback
            };
            return ChannelFrame {
                channel: state.channel,
                source,
                target: Some(name.to_string()),
                texture: Some(texture.clone()),
                segment,
                sub_frame: target.offset_in_segment(frame),
            };
        }
    }

    let (segment, sub_frame) = active
        .and_then(|name| session.texture_target(&state.stream_key(name)))
        .map(|t| {
            let frame = frame_at(time, t.frame_rate).min(t.frame_count.saturating_sub(1));
            (t.segment_of(frame), t.offset_in_segment(frame))
        })
        .unwrap_or((0, 0));

    ChannelFrame {
        channel: state.channel,
        source: TextureSource::Placeholder,
        target: None,
        texture: None,
        segment,
        sub_frame,
    }
}

/// Release everything more than `margin` indices behind each stream's cursor.
/// Cursors are clamped like in `present`, so a stream that ran out early keeps
/// its last index on screen.
fn evict(session: &mut TrackSession, time: f64, margin: u32) {
    let manifest = session.manifest.clone();

    let geometry_floor = |target: &str| {
        manifest
            .geometry_target(target)
            .map(|t| {
                frame_at(time, t.frame_rate)
                    .min(t.last_frame())
                    .saturating_sub(margin)
            })
            .unwrap_or(0)
    };
    let texture_floor = |key: &TextureStreamKey| {
        manifest
            .texture_target(key.channel, &key.target)
            .map(|t| {
                let frame = frame_at(time, t.frame_rate).min(t.frame_count.saturating_sub(1));
                t.segment_of(frame).saturating_sub(margin)
            })
            .unwrap_or(0)
    };

    let geometry = session.buffers.evict_geometry(|key| geometry_floor(&key.target));
    let textures = session.buffers.evict_textures(texture_floor);
    if geometry + textures > 0 {
        trace!(
            "[{}] evicted {} geometry frame(s), {} texture segment(s)",
            session.id, geometry, textures
        );
    }
}
