use tracing::{debug, info};

use super::Manifest;
use crate::{common::errors::ManifestError, fetch::Fetcher};

/// Fetch and validate the manifest at `url`.
pub async fn load(fetcher: &dyn Fetcher, url: &str) -> Result<Manifest, ManifestError> {
    debug!("Fetching manifest {}", url);
    let body = fetcher
        .fetch(url, None)
        .await
        .map_err(|source| ManifestError::Fetch {
            url: url.to_string(),
            source,
        })?;

    let text = String::from_utf8_lossy(&body);
    let manifest = Manifest::from_json(url, &text)?;

    info!(
        "Loaded {:?} manifest: {} geometry target(s), {} texture channel(s)",
        manifest.version,
        manifest.geometry.len(),
        manifest.textures.len()
    );
    Ok(manifest)
}
