//! Browser profile (user-data) directory ownership.

use crate::ProfileDir;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RANDOM_PREFIX: &str = "cdp";

/// A resolved profile directory
///
/// Random directories are owned by the capture that created them and are
/// removed by [`ProfileDirectory::remove`], but only while they live under the
/// system temp root. Fixed directories are never removed.
#[derive(Debug)]
pub struct ProfileDirectory {
    path: PathBuf,
    random: bool,
}

impl ProfileDirectory {
    pub fn resolve(profile: &ProfileDir) -> io::Result<Self> {
        match profile {
            ProfileDir::Random => Self::create_random(&std::env::temp_dir()),
            ProfileDir::Fixed(path) => {
                std::fs::create_dir_all(path)?;
                Ok(Self {
                    path: path.clone(),
                    random: false,
                })
            }
        }
    }

    fn create_random(root: &Path) -> io::Result<Self> {
        let path = root.join(format!("{RANDOM_PREFIX}{}", uuid::Uuid::new_v4().simple()));

        let mut builder = std::fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&path)?;

        debug!(path = %path.display(), "Created random profile directory");
        Ok(Self { path, random: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_random(&self) -> bool {
        self.random
    }

    /// Best-effort removal. Returns whether the directory was removed.
    pub fn remove(&self) -> bool {
        if !self.random || !self.path.starts_with(std::env::temp_dir()) {
            return false;
        }

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed profile directory");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove profile directory");
                false
            }
        }
    }
}
