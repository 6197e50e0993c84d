//! Thumbnail cache
//!
//! Thumbnails live in the user-wide cache, keyed by the source content
//! hash (folded with the mtime the caller observed) and the edge length.
//! Generation decodes through the `image` crate and bounds the result by
//! the longest edge.

use crate::build::{cache_key, MAX_SOURCE_SIZE};
use crate::error::{GeodexError, Result};
use crate::hash;
use crate::profile::Profile;
use std::path::{Path, PathBuf};

/// Return the cached thumbnail path for an image, producing it on miss
/// (or always, with `force_recreate`).
pub fn get_thumbnail(
    profile: &Profile,
    image_path: &Path,
    mtime: i64,
    size: u32,
    force_recreate: bool,
) -> Result<PathBuf> {
    if size == 0 {
        return Err(GeodexError::InvalidArgument(
            "thumbnail size cannot be zero".to_string(),
        ));
    }

    let source_size = std::fs::metadata(image_path)?.len();
    if source_size > MAX_SOURCE_SIZE {
        return Err(GeodexError::Parse(format!(
            "source too large for thumbnail generation ({source_size} bytes): {}",
            image_path.display()
        )));
    }

    let content_hash = hash::file_sha256(image_path)?;
    let key = cache_key(&content_hash, &mtime.to_string());
    let thumbs_dir = Profile::ensure_dir(profile.thumbs_dir())?;
    let output = thumbs_dir.join(format!("{key}-{size}.jpg"));

    if output.exists() && !force_recreate {
        tracing::debug!("thumbnail cache hit: {}", output.display());
        return Ok(output);
    }

    let img = image::open(image_path)
        .map_err(|e| GeodexError::Parse(format!("cannot decode {}: {e}", image_path.display())))?;
    let thumbnail = img.thumbnail(size, size);
    thumbnail
        .to_rgb8()
        .save_with_format(&output, image::ImageFormat::Jpeg)
        .map_err(|e| GeodexError::Parse(format!("cannot encode thumbnail: {e}")))?;

    tracing::debug!("generated thumbnail {}", output.display());
    Ok(output)
}
