//! Manifest Model: the declarative description of a volumetric track.
//!
//! # Module layout
//!
//! ```text
//! src/manifest/
//! ├── mod.rs       ← validated model + JSON parsing
//! ├── template.rs  ← path templates and URL resolution
//! ├── legacy.rs    ← V1 header normalisation
//! └── loader.rs    ← fetch + parse over a `Fetcher`
//! ```
//!
//! Parsing happens in two steps: serde reads the wire shape into private
//! `Raw*` structs, then [`Manifest::validate_raw`] checks the invariants and
//! builds the immutable model the rest of the player works with.

pub mod legacy;
pub mod loader;
pub mod template;

pub use loader::load;
pub use template::{PathTemplate, TemplateVars, pad, resolve_url};

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::common::errors::ManifestError;

// ─── Formats ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFormat {
    Draco,
    Glb,
}

impl GeometryFormat {
    pub fn as_ext(&self) -> &'static str {
        match self {
            Self::Draco => "drc",
            Self::Glb => "glb",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    #[serde(rename = "ktx2")]
    Ktx2,
    #[serde(rename = "astc/ktx")]
    AstcKtx,
    #[serde(rename = "video")]
    Video,
}

impl TextureFormat {
    pub fn as_ext(&self) -> &'static str {
        match self {
            Self::Ktx2 => "ktx2",
            Self::AstcKtx => "ktx",
            Self::Video => "mp4",
        }
    }

    /// Rank of the codec family when choosing between targets. Higher wins.
    ///
    /// ASTC uploads without transcoding; KTX2 needs a basis transcode first;
    /// video textures are the legacy path and only used when nothing else exists.
    pub fn priority(&self) -> u8 {
        match self {
            Self::AstcKtx => 2,
            Self::Ktx2 => 1,
            Self::Video => 0,
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ktx2 => "ktx2",
            Self::AstcKtx => "astc/ktx",
            Self::Video => "video",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Ogg,
    Wav,
}

impl AudioFormat {
    pub fn as_ext(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ogg => "ogg",
            Self::Wav => "wav",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Aac => "audio/aac",
            Self::Ogg => "audio/ogg",
            Self::Wav => "audio/wav",
        }
    }
}

/// Texture channel. `BaseColor` is mandatory and anchors quality adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextureType {
    BaseColor,
    Normal,
    MetallicRoughness,
    Emissive,
    Occlusion,
}

impl TextureType {
    pub const ALL: [TextureType; 5] = [
        Self::BaseColor,
        Self::Normal,
        Self::MetallicRoughness,
        Self::Emissive,
        Self::Occlusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaseColor => "baseColor",
            Self::Normal => "normal",
            Self::MetallicRoughness => "metallicRoughness",
            Self::Emissive => "emissive",
            Self::Occlusion => "occlusion",
        }
    }
}

impl fmt::Display for TextureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextureType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────

/// Byte span of one frame or segment inside a shared blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` header (inclusive end).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.start + self.length.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryTarget {
    pub format: GeometryFormat,
    pub frame_rate: f64,
    pub frame_count: u32,
    pub settings: serde_json::Value,
    /// One entry per frame when every frame lives in the same blob.
    pub byte_ranges: Option<Vec<ByteRange>>,
}

impl GeometryTarget {
    pub fn last_frame(&self) -> u32 {
        self.frame_count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureTarget {
    pub format: TextureFormat,
    pub frame_rate: f64,
    /// Frames packed into one segment.
    pub sequence_size: u32,
    pub sequence_count: u32,
    pub frame_count: u32,
    pub resolution: Resolution,
    pub settings: serde_json::Value,
    /// One entry per segment when every segment lives in the same blob.
    pub byte_ranges: Option<Vec<ByteRange>>,
}

impl TextureTarget {
    /// Pixels uploaded per second of playback.
    pub fn pixel_throughput(&self) -> f64 {
        self.resolution.width as f64 * self.resolution.height as f64 * self.frame_rate
    }

    pub fn segment_of(&self, frame: u32) -> u32 {
        frame / self.sequence_size
    }

    pub fn offset_in_segment(&self, frame: u32) -> u32 {
        frame % self.sequence_size
    }

    pub fn last_segment(&self) -> u32 {
        self.sequence_count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureChannel {
    pub targets: BTreeMap<String, TextureTarget>,
    /// Declared content variants, in manifest order. Never empty.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSection {
    pub path: PathTemplate,
    pub formats: Vec<AudioFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestVersion {
    /// Single-target header with byte-ranged mesh blob and a video texture.
    Legacy,
    Multi,
}

/// Immutable description of a track, loaded once per track.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub version: ManifestVersion,
    pub audio: Option<AudioSection>,
    pub geometry_path: PathTemplate,
    pub geometry: BTreeMap<String, GeometryTarget>,
    pub texture_path: PathTemplate,
    pub textures: BTreeMap<TextureType, TextureChannel>,
}

pub const DEFAULT_TAG: &str = "default";

impl Manifest {
    /// Parse either manifest generation from JSON text.
    pub fn from_json(manifest_url: &str, text: &str) -> Result<Self, ManifestError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if legacy::is_legacy(&value) {
            let header: legacy::LegacyHeader = serde_json::from_value(value)?;
            return legacy::normalize(manifest_url, header);
        }

        let raw: RawManifest = serde_json::from_value(value)?;
        Self::validate_raw(raw)
    }

    pub fn geometry_target(&self, name: &str) -> Option<&GeometryTarget> {
        self.geometry.get(name)
    }

    pub fn texture_target(&self, channel: TextureType, name: &str) -> Option<&TextureTarget> {
        self.textures.get(&channel)?.targets.get(name)
    }

    pub fn has_audio(&self) -> bool {
        self.audio
            .as_ref()
            .is_some_and(|a| !a.path.as_str().is_empty() && !a.formats.is_empty())
    }

    fn validate_raw(raw: RawManifest) -> Result<Self, ManifestError> {
        if raw.geometry.targets.is_empty() {
            return Err(ManifestError::MissingGeometry);
        }

        let geometry_path = PathTemplate::new(raw.geometry.path);
        let mut geometry = BTreeMap::new();
        for (name, target) in raw.geometry.targets {
            let target = validate_geometry_target(&name, target)?;
            if target.byte_ranges.is_none() && !geometry_path.has_index() {
                return Err(ManifestError::MissingIndexPlaceholder(
                    geometry_path.as_str().to_string(),
                ));
            }
            geometry.insert(name, target);
        }

        let tags = raw.input.map(|i| i.tags()).unwrap_or_default();
        let texture_path = PathTemplate::new(raw.texture.path.clone());
        let mut textures = BTreeMap::new();
        for (channel, raw_channel) in raw.texture.channels() {
            if raw_channel.targets.is_empty() {
                return Err(ManifestError::MissingTexture(channel));
            }

            let mut targets = BTreeMap::new();
            for (name, target) in raw_channel.targets {
                let target = validate_texture_target(&name, target)?;
                if target.byte_ranges.is_none() && !texture_path.has_index() {
                    return Err(ManifestError::MissingIndexPlaceholder(
                        texture_path.as_str().to_string(),
                    ));
                }
                targets.insert(name, target);
            }

            let channel_tags = tags
                .get(&channel)
                .filter(|t| !t.is_empty())
                .cloned()
                .unwrap_or_else(|| vec![DEFAULT_TAG.to_string()]);

            textures.insert(
                channel,
                TextureChannel {
                    targets,
                    tags: channel_tags,
                },
            );
        }

        if !textures.contains_key(&TextureType::BaseColor) {
            return Err(ManifestError::MissingTexture(TextureType::BaseColor));
        }

        Ok(Self {
            version: ManifestVersion::Multi,
            audio: raw.audio.map(|a| AudioSection {
                path: PathTemplate::new(a.path),
                formats: a.formats,
            }),
            geometry_path,
            geometry,
            texture_path,
            textures,
        })
    }
}

fn invalid(target: &str, field: &'static str, reason: impl Into<String>) -> ManifestError {
    ManifestError::InvalidTarget {
        target: target.to_string(),
        field,
        reason: reason.into(),
    }
}

fn check_frame_rate(name: &str, frame_rate: f64) -> Result<(), ManifestError> {
    if frame_rate.is_finite() && frame_rate > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, "frameRate", format!("{} is not positive", frame_rate)))
    }
}

fn validate_geometry_target(
    name: &str,
    raw: RawGeometryTarget,
) -> Result<GeometryTarget, ManifestError> {
    check_frame_rate(name, raw.frame_rate)?;
    if raw.frame_count == 0 {
        return Err(invalid(name, "frameCount", "must be at least 1"));
    }
    if let Some(ranges) = &raw.byte_ranges {
        if ranges.len() != raw.frame_count as usize {
            return Err(invalid(
                name,
                "byteRanges",
                format!("{} ranges for {} frames", ranges.len(), raw.frame_count),
            ));
        }
    }

    Ok(GeometryTarget {
        format: raw.format,
        frame_rate: raw.frame_rate,
        frame_count: raw.frame_count,
        settings: raw.settings,
        byte_ranges: raw.byte_ranges,
    })
}

fn validate_texture_target(
    name: &str,
    raw: RawTextureTarget,
) -> Result<TextureTarget, ManifestError> {
    check_frame_rate(name, raw.frame_rate)?;

    let sequence_size = raw.sequence_size.unwrap_or(1);
    if sequence_size == 0 {
        return Err(invalid(name, "sequenceSize", "must be at least 1"));
    }

    let (frame_count, sequence_count) = match (raw.frame_count, raw.sequence_count) {
        (Some(frames), Some(segments)) => (frames, segments),
        (Some(frames), None) => (frames, frames.div_ceil(sequence_size)),
        (None, Some(segments)) => (segments * sequence_size, segments),
        (None, None) => {
            return Err(invalid(
                name,
                "frameCount",
                "neither frameCount nor sequenceCount is declared",
            ));
        }
    };
    if frame_count == 0 || sequence_count == 0 {
        return Err(invalid(name, "frameCount", "track has no frames"));
    }
    if let Some(ranges) = &raw.byte_ranges {
        if ranges.len() != sequence_count as usize {
            return Err(invalid(
                name,
                "byteRanges",
                format!("{} ranges for {} segments", ranges.len(), sequence_count),
            ));
        }
    }

    let mut settings = raw.settings;
    let resolution = settings
        .remove("resolution")
        .map(serde_json::from_value::<Resolution>)
        .transpose()?
        .ok_or_else(|| invalid(name, "settings.resolution", "missing"))?;

    Ok(TextureTarget {
        format: raw.format,
        frame_rate: raw.frame_rate,
        sequence_size,
        sequence_count,
        frame_count,
        resolution,
        settings: serde_json::Value::Object(settings),
        byte_ranges: raw.byte_ranges,
    })
}

// ─── Wire shape ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    audio: Option<RawAudio>,
    geometry: RawGeometry,
    texture: RawTexture,
    #[serde(default)]
    input: Option<RawInput>,
}

#[derive(Debug, Deserialize)]
struct RawAudio {
    path: String,
    #[serde(default)]
    formats: Vec<AudioFormat>,
}

#[derive(Debug, Deserialize)]
struct RawGeometry {
    path: String,
    targets: BTreeMap<String, RawGeometryTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGeometryTarget {
    format: GeometryFormat,
    frame_rate: f64,
    frame_count: u32,
    #[serde(default)]
    settings: serde_json::Value,
    byte_ranges: Option<Vec<ByteRange>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTexture {
    path: String,
    base_color: Option<RawTextureChannel>,
    normal: Option<RawTextureChannel>,
    metallic_roughness: Option<RawTextureChannel>,
    emissive: Option<RawTextureChannel>,
    occlusion: Option<RawTextureChannel>,
}

impl RawTexture {
    fn channels(self) -> impl Iterator<Item = (TextureType, RawTextureChannel)> {
        [
            (TextureType::BaseColor, self.base_color),
            (TextureType::Normal, self.normal),
            (TextureType::MetallicRoughness, self.metallic_roughness),
            (TextureType::Emissive, self.emissive),
            (TextureType::Occlusion, self.occlusion),
        ]
        .into_iter()
        .filter_map(|(t, c)| c.map(|c| (t, c)))
    }
}

#[derive(Debug, Deserialize)]
struct RawTextureChannel {
    #[serde(default)]
    targets: BTreeMap<String, RawTextureTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTextureTarget {
    format: TextureFormat,
    frame_rate: f64,
    sequence_size: Option<u32>,
    sequence_count: Option<u32>,
    frame_count: Option<u32>,
    #[serde(default)]
    settings: serde_json::Map<String, serde_json::Value>,
    byte_ranges: Option<Vec<ByteRange>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInput {
    #[serde(default)]
    texture: BTreeMap<String, OneOrMany<RawTextureInput>>,
}

impl RawInput {
    fn tags(self) -> BTreeMap<TextureType, Vec<String>> {
        self.texture
            .into_iter()
            .filter_map(|(key, inputs)| {
                let channel = key.parse::<TextureType>().ok()?;
                let tags = inputs.into_vec().into_iter().filter_map(|i| i.tag).collect();
                Some((channel, tags))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawTextureInput {
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(v) => v,
            Self::One(v) => vec![v],
        }
    }
}
