//! Process configuration handle
//!
//! Carries the user-wide directories the crate needs (derived-artifact
//! cache, database templates). Always passed by parameter; the crate never
//! reads it from ambient global state.

use crate::error::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Profile {
    root: PathBuf,
}

impl Profile {
    /// Profile rooted at the platform cache directory.
    pub fn new() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("geodex");
        Self { root }
    }

    /// Profile rooted at an explicit directory. Tests and embedded hosts
    /// use this to keep the cache out of the user profile.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs")
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.root.join("tiles")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    /// Create a subdirectory on demand and hand it back.
    pub(crate) fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_profile_layout() {
        let profile = Profile::rooted("/tmp/gx");
        assert_eq!(profile.thumbs_dir(), PathBuf::from("/tmp/gx/thumbs"));
        assert_eq!(profile.tiles_dir(), PathBuf::from("/tmp/gx/tiles"));
        assert_eq!(profile.templates_dir(), PathBuf::from("/tmp/gx/templates"));
    }
}
