//! Target Selector: which quality variant each stream starts on.

use std::{cmp::Ordering, collections::BTreeMap};

use tracing::debug;

use crate::{
    codec::TextureCapabilities,
    common::errors::UnsupportedFormatError,
    manifest::{DEFAULT_TAG, GeometryTarget, TextureChannel, TextureTarget, TextureType},
};

/// Lowest frame rate wins. Ties go to the first name in manifest order.
pub fn choose_geometry_target(targets: &BTreeMap<String, GeometryTarget>) -> Option<String> {
    targets
        .iter()
        .min_by(|(_, a), (_, b)| {
            a.frame_rate
                .partial_cmp(&b.frame_rate)
                .unwrap_or(Ordering::Equal)
        })
        .map(|(name, _)| name.clone())
}

/// Renderable targets, best codec family first, then cheapest first.
///
/// The first entry is the initial active target; later entries are upgrade
/// candidates for quality adaptation.
pub fn choose_texture_targets(
    channel: TextureType,
    targets: &BTreeMap<String, TextureTarget>,
    capabilities: &dyn TextureCapabilities,
) -> Result<Vec<String>, UnsupportedFormatError> {
    let mut supported: Vec<(&String, &TextureTarget)> = targets
        .iter()
        .filter(|(_, t)| capabilities.supports_texture_format(t.format))
        .collect();

    if supported.is_empty() {
        let mut formats: Vec<_> = targets.values().map(|t| t.format).collect();
        formats.dedup();
        return Err(UnsupportedFormatError { channel, formats });
    }

    supported.sort_by(|(_, a), (_, b)| compare_targets(a, b));

    let names: Vec<String> = supported.into_iter().map(|(n, _)| n.clone()).collect();
    debug!("{} candidates: {:?}", channel, names);
    Ok(names)
}

fn compare_targets(a: &TextureTarget, b: &TextureTarget) -> Ordering {
    b.format
        .priority()
        .cmp(&a.format.priority())
        .then_with(|| {
            a.pixel_throughput()
                .partial_cmp(&b.pixel_throughput())
                .unwrap_or(Ordering::Equal)
        })
}

/// First declared tag; channels never switch tags at runtime.
pub fn choose_tag(channel: &TextureChannel) -> String {
    channel
        .tags
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_TAG.to_string())
}
