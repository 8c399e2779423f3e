use thiserror::Error;

use crate::manifest::{TextureFormat, TextureType};

/// A manifest that could not be turned into a playable track.
///
/// Fatal to the track: surfaced to the caller of `Player::load_track`, never retried.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to fetch manifest {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("malformed manifest JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("manifest declares no `{0}` texture targets")]
    MissingTexture(TextureType),
    #[error("manifest declares no geometry targets")]
    MissingGeometry,
    #[error("target `{target}` has an invalid {field}: {reason}")]
    InvalidTarget {
        target: String,
        field: &'static str,
        reason: String,
    },
    #[error("path template `{0}` has no frame index placeholder")]
    MissingIndexPlaceholder(String),
}

/// Network failure for a single frame or segment. Absorbed by the scheduler.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned {actual} bytes for a {expected}-byte range")]
    ShortRange {
        url: String,
        expected: u64,
        actual: u64,
    },
    #[error("{0} not found")]
    NotFound(String),
}

/// The codec rejected a payload. Absorbed by the scheduler exactly like `FetchError`.
#[derive(Debug, Error)]
#[error("{codec} decoder rejected {url}: {reason}")]
pub struct DecodeError {
    pub codec: String,
    pub url: String,
    pub reason: String,
}

impl DecodeError {
    pub fn new(
        codec: impl Into<String>,
        url: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            codec: codec.into(),
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// No target of a texture channel can be rendered on the current surface.
///
/// Not fatal: the channel stays on the placeholder material for the whole track.
#[derive(Debug, Error)]
#[error("none of the {channel} targets are renderable (formats: {formats:?})")]
pub struct UnsupportedFormatError {
    pub channel: TextureType,
    pub formats: Vec<TextureFormat>,
}

/// Top-level error returned by the player surface.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("no track is loaded")]
    NoTrack,
}

/// Failure of a single scheduled request, as recorded by a prefetch pass.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
