//! Deselect and remove sequencing against the backend.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError, FileEntry};

/// How many times a deselect is sent per stop. The backend's file deselect
/// leaves residual download activity after a single call; a second call
/// clears it. This is a fixed repeat, not a retry on failure.
pub const DESELECT_REPEAT: usize = 2;

/// What `remove` does about files that are still selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovePolicy {
    /// One `/remove` call; the backend drops every file with the torrent.
    #[default]
    BackendAtomic,
    /// Deselect every listed file (with the deselect repeat) before removing.
    DeselectFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownPolicy {
    pub deselect_repeat: usize,
    pub remove: RemovePolicy,
}

impl Default for TeardownPolicy {
    fn default() -> Self {
        Self {
            deselect_repeat: DESELECT_REPEAT,
            remove: RemovePolicy::default(),
        }
    }
}

impl TeardownPolicy {
    pub fn with_remove_policy(remove: RemovePolicy) -> Self {
        Self {
            remove,
            ..Self::default()
        }
    }
}

pub struct TeardownCoordinator<'a, B> {
    backend: &'a B,
    policy: TeardownPolicy,
}

impl<'a, B: Backend> TeardownCoordinator<'a, B> {
    pub fn new(backend: &'a B, policy: TeardownPolicy) -> Self {
        Self { backend, policy }
    }

    /// Send every deselect call regardless of earlier outcomes. Returns the
    /// first failure, if any.
    pub async fn deselect(&self, magnet_id: &str, file_key: &str) -> Result<(), BackendError> {
        let mut first_error = None;

        for attempt in 1..=self.policy.deselect_repeat {
            match self.backend.deselect_file(magnet_id, file_key).await {
                Ok(()) => debug!(file = file_key, attempt, "deselect sent"),
                Err(e) => {
                    warn!(file = file_key, attempt, error = %e, "deselect failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove the torrent. Under `DeselectFirst` the listed files are
    /// deselected first; those failures are logged and do not stop removal.
    pub async fn remove(&self, magnet_id: &str, files: &[FileEntry]) -> Result<(), BackendError> {
        if self.policy.remove == RemovePolicy::DeselectFirst {
            for file in files {
                if let Err(e) = self.deselect(magnet_id, file.key()).await {
                    debug!(file = file.key(), error = %e, "deselect before remove failed");
                }
            }
        }

        self.backend.remove_torrent(magnet_id).await?;
        info!("torrent removed from backend");
        Ok(())
    }
}
