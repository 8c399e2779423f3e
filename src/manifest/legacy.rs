//! V1 header support.
//!
//! The first generation of tracks shipped as three sibling files:
//!
//! ```text
//! dancer.manifest   ← JSON header, one entry per frame
//! dancer.drcs       ← every Draco frame concatenated
//! dancer.mp4        ← the whole texture as one video
//! ```
//!
//! The header is normalised into a single-target [`Manifest`] so the scheduler
//! only ever deals with one model: geometry frames become byte ranges into the
//! `.drcs` blob, and the video becomes one texture segment spanning the track.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{
    ByteRange, GeometryFormat, GeometryTarget, Manifest, ManifestVersion, PathTemplate,
    Resolution, TextureChannel, TextureFormat, TextureTarget, TextureType, DEFAULT_TAG,
};
use crate::common::errors::ManifestError;

pub const LEGACY_TARGET: &str = "legacy";

const HEADER_EXT: &str = ".manifest";
const MESH_EXT: &str = "drcs";
const VIDEO_EXT: &str = "mp4";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyHeader {
    pub frame_rate: f64,
    #[serde(default)]
    pub max_vertices: u32,
    #[serde(default)]
    pub max_triangles: u32,
    pub frame_data: Vec<LegacyFrame>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFrame {
    pub frame_number: u32,
    pub start_byte_position: u64,
    pub mesh_length: u64,
}

/// A V1 header carries `frameData` and no `geometry` section.
pub fn is_legacy(value: &serde_json::Value) -> bool {
    value.get("frameData").is_some() && value.get("geometry").is_none()
}

/// Name of a sibling file: `tracks/dancer.manifest` + `mp4` → `dancer.mp4`.
fn sibling_file(manifest_url: &str, ext: &str) -> String {
    let file = manifest_url.rsplit('/').next().unwrap_or(manifest_url);
    let file = file.split(['?', '#']).next().unwrap_or(file);
    let stem = file
        .strip_suffix(HEADER_EXT)
        .or_else(|| file.rsplit_once('.').map(|(stem, _)| stem))
        .unwrap_or(file);
    format!("{}.{}", stem, ext)
}

pub fn normalize(manifest_url: &str, mut header: LegacyHeader) -> Result<Manifest, ManifestError> {
    if header.frame_data.is_empty() {
        return Err(ManifestError::MissingGeometry);
    }
    if !(header.frame_rate.is_finite() && header.frame_rate > 0.0) {
        return Err(ManifestError::InvalidTarget {
            target: LEGACY_TARGET.to_string(),
            field: "frameRate",
            reason: format!("{} is not positive", header.frame_rate),
        });
    }

    header.frame_data.sort_by_key(|f| f.frame_number);
    let frame_count = header.frame_data.len() as u32;
    let byte_ranges = header
        .frame_data
        .iter()
        .map(|f| ByteRange {
            start: f.start_byte_position,
            length: f.mesh_length,
        })
        .collect();

    let geometry = BTreeMap::from([(
        LEGACY_TARGET.to_string(),
        GeometryTarget {
            format: GeometryFormat::Draco,
            frame_rate: header.frame_rate,
            frame_count,
            settings: serde_json::json!({
                "maxVertices": header.max_vertices,
                "maxTriangles": header.max_triangles,
            }),
            byte_ranges: Some(byte_ranges),
        },
    )]);

    let video = TextureTarget {
        format: TextureFormat::Video,
        frame_rate: header.frame_rate,
        sequence_size: frame_count,
        sequence_count: 1,
        frame_count,
        // Decoded size is only known once the video element has metadata.
        resolution: Resolution {
            width: 0,
            height: 0,
        },
        settings: serde_json::Value::Null,
        byte_ranges: None,
    };
    let textures = BTreeMap::from([(
        TextureType::BaseColor,
        TextureChannel {
            targets: BTreeMap::from([(LEGACY_TARGET.to_string(), video)]),
            tags: vec![DEFAULT_TAG.to_string()],
        },
    )]);

    Ok(Manifest {
        version: ManifestVersion::Legacy,
        audio: None,
        geometry_path: PathTemplate::new(sibling_file(manifest_url, MESH_EXT)),
        geometry,
        texture_path: PathTemplate::new(sibling_file(manifest_url, VIDEO_EXT)),
        textures,
    })
}
