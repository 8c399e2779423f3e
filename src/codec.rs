//! Collaborators the playback core talks to but never implements itself:
//! decoders, the render surface, the audio element and the presentation sink.
//!
//! Payloads are opaque. The core moves [`MeshPayload`] and [`TexturePayload`]
//! handles between the decoders, the buffer store and the sink; dropping the
//! last clone of a handle is what releases the decoded resource.

use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    common::errors::DecodeError,
    compositor::Presentation,
    manifest::{AudioFormat, GeometryFormat, TextureFormat},
};

pub type Handle = Arc<dyn Any + Send + Sync>;

/// Axis-aligned box plus bounding sphere of a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingVolume {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub center: [f32; 3],
    pub radius: f32,
}

impl BoundingVolume {
    /// Scale the box about its centre and the sphere radius by `factor`.
    pub fn enlarged(&self, factor: f32) -> Self {
        let box_center: [f32; 3] = std::array::from_fn(|i| (self.min[i] + self.max[i]) * 0.5);
        let half: [f32; 3] = std::array::from_fn(|i| (self.max[i] - self.min[i]) * 0.5 * factor);
        Self {
            min: std::array::from_fn(|i| box_center[i] - half[i]),
            max: std::array::from_fn(|i| box_center[i] + half[i]),
            center: self.center,
            radius: self.radius * factor,
        }
    }
}

#[derive(Clone)]
pub struct MeshPayload {
    pub handle: Handle,
    pub bounds: Option<BoundingVolume>,
}

impl fmt::Debug for MeshPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshPayload")
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

/// A decoded texture segment: an array of `sequenceSize` sub-frames behind one handle.
#[derive(Clone)]
pub struct TexturePayload {
    pub handle: Handle,
}

impl fmt::Debug for TexturePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TexturePayload").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait GeometryDecoder: Send + Sync {
    /// `url` only identifies the payload in errors and logs.
    async fn decode_geometry(
        &self,
        bytes: Bytes,
        format: GeometryFormat,
        url: &str,
    ) -> Result<MeshPayload, DecodeError>;
}

#[async_trait]
pub trait TextureDecoder: Send + Sync {
    async fn decode_texture(
        &self,
        bytes: Bytes,
        format: TextureFormat,
        url: &str,
    ) -> Result<TexturePayload, DecodeError>;
}

/// Render surface capability query, consulted once per track at selection time.
pub trait TextureCapabilities: Send + Sync {
    fn supports_texture_format(&self, format: TextureFormat) -> bool;
}

/// Audio element backing the time base.
pub trait MediaElement: Send + Sync {
    fn current_time(&self) -> f64;
    fn paused(&self) -> bool;
    fn ended(&self) -> bool;
    fn play(&self);
    fn pause(&self);
    fn can_play(&self, format: AudioFormat) -> bool;
    fn set_source(&self, url: &str);
}

/// Receives one directive per shown frame.
pub trait PresentationSink: Send + Sync {
    fn present(&self, presentation: &Presentation);
}

// ─── Pass-through implementations ─────────────────────────────────────────────

/// Keeps the encoded bytes as the payload. Used when decoding happens further
/// down the pipeline, and by the headless binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

#[async_trait]
impl GeometryDecoder for PassthroughDecoder {
    async fn decode_geometry(
        &self,
        bytes: Bytes,
        format: GeometryFormat,
        url: &str,
    ) -> Result<MeshPayload, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::new(format.as_ext(), url, "empty payload"));
        }
        Ok(MeshPayload {
            handle: Arc::new(bytes),
            bounds: None,
        })
    }
}

#[async_trait]
impl TextureDecoder for PassthroughDecoder {
    async fn decode_texture(
        &self,
        bytes: Bytes,
        format: TextureFormat,
        url: &str,
    ) -> Result<TexturePayload, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::new(format.to_string(), url, "empty payload"));
        }
        Ok(TexturePayload {
            handle: Arc::new(bytes),
        })
    }
}

/// Surface that accepts a fixed set of formats.
#[derive(Debug, Clone)]
pub struct StaticCapabilities {
    formats: Vec<TextureFormat>,
}

impl StaticCapabilities {
    pub fn new(formats: impl Into<Vec<TextureFormat>>) -> Self {
        Self {
            formats: formats.into(),
        }
    }

    pub fn all() -> Self {
        Self::new([TextureFormat::AstcKtx, TextureFormat::Ktx2, TextureFormat::Video])
    }
}

impl TextureCapabilities for StaticCapabilities {
    fn supports_texture_format(&self, format: TextureFormat) -> bool {
        self.formats.contains(&format)
    }
}
