use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Where mediasearch keeps its settings, its caption index and, unless
/// configured elsewhere, the media it serves.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the root: `--data-dir` wins, then `MEDIASEARCH_DATA_DIR`, then
    /// `$XDG_DATA_HOME/mediasearch`. The root is created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("MEDIASEARCH_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("mediasearch")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::error!(
                path = %root.display(),
                "cannot create data dir: {e}"
            );
            return Err(Error::DataDir(root));
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Settings written by `mediasearch config set`.
    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Location of the caption index. Not created here: the index manager
    /// owns this directory and recreates it on every rebuild.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// Media roots used when `images_dir` and `videos_dir` are unset.
    pub fn default_images_dir(&self) -> PathBuf {
        self.root.join("media").join("images")
    }

    pub fn default_videos_dir(&self) -> PathBuf {
        self.root.join("media").join("videos")
    }
}
