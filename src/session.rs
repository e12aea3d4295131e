use std::fmt;

use crate::backend::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Played by the app's own player.
    Embedded,
    /// Handed to an OS-level player through the backend.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackTarget {
    /// The torrent streamed as a single file (`/stream`).
    WholeTorrent,
    /// One file of a multi-file torrent, by file key.
    File(String),
}

impl PlaybackTarget {
    pub fn file_key(&self) -> Option<&str> {
        match self {
            PlaybackTarget::WholeTorrent => None,
            PlaybackTarget::File(key) => Some(key),
        }
    }
}

impl fmt::Display for PlaybackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackTarget::WholeTorrent => f.write_str("whole torrent"),
            PlaybackTarget::File(key) => write!(f, "file {}", key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Listed,
    Playing {
        mode: PlaybackMode,
        target: PlaybackTarget,
    },
}

/// Source URLs the embedded player is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub video: String,
    pub subtitle: Option<String>,
}

/// Last successful handoff to the external player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDispatch {
    pub target: PlaybackTarget,
    pub stream_url: String,
}

/// Everything known about the active torrent. Only the playback controller
/// mutates a session; everyone else sees [`SessionSnapshot`]s.
#[derive(Debug, Clone)]
pub struct Session {
    magnet_id: String,
    generation: u64,
    added: bool,
    files: Vec<FileEntry>,
    state: PlaybackState,
    selected: Option<PlaybackTarget>,
    sources: Option<Sources>,
    external: Option<ExternalDispatch>,
    metadata_request: u64,
    playback: u64,
}

impl Session {
    pub fn new(magnet_id: impl Into<String>, generation: u64) -> Self {
        Self {
            magnet_id: magnet_id.into(),
            generation,
            added: false,
            files: Vec::new(),
            state: PlaybackState::Idle,
            selected: None,
            sources: None,
            external: None,
            metadata_request: 0,
            playback: 0,
        }
    }

    pub fn magnet_id(&self) -> &str {
        &self.magnet_id
    }

    /// Changes whenever the session is replaced or closed.
    /// Responses tagged with an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_added(&self) -> bool {
        self.added
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn selected(&self) -> Option<&PlaybackTarget> {
        self.selected.as_ref()
    }

    pub fn sources(&self) -> Option<&Sources> {
        self.sources.as_ref()
    }

    pub fn external(&self) -> Option<&ExternalDispatch> {
        self.external.as_ref()
    }

    pub fn find_file(&self, file_key: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.key() == file_key)
    }

    /// Bumped by every play transition. A teardown started under one value
    /// must not clear playback that began after it.
    pub fn playback(&self) -> u64 {
        self.playback
    }

    pub(crate) fn mark_added(&mut self) {
        self.added = true;
    }

    /// Tag a new metadata request. Only the latest tag may apply its files.
    pub(crate) fn next_metadata_request(&mut self) -> u64 {
        self.metadata_request += 1;
        self.metadata_request
    }

    pub(crate) fn is_latest_metadata_request(&self, request: u64) -> bool {
        self.metadata_request == request
    }

    pub(crate) fn replace_files(&mut self, files: Vec<FileEntry>) {
        self.files = files;
        if self.state == PlaybackState::Idle {
            self.state = PlaybackState::Listed;
        }
    }

    pub(crate) fn play_embedded(&mut self, target: PlaybackTarget, sources: Sources) {
        self.playback += 1;
        self.state = PlaybackState::Playing {
            mode: PlaybackMode::Embedded,
            target: target.clone(),
        };
        self.selected = Some(target);
        self.sources = Some(sources);
    }

    /// Embedded sources are left alone; the handoff plays elsewhere.
    pub(crate) fn play_external(&mut self, target: PlaybackTarget, stream_url: String) {
        self.playback += 1;
        self.state = PlaybackState::Playing {
            mode: PlaybackMode::External,
            target: target.clone(),
        };
        self.selected = Some(target.clone());
        self.external = Some(ExternalDispatch { target, stream_url });
    }

    pub(crate) fn clear_playback(&mut self) {
        self.selected = None;
        self.sources = None;
        self.external = None;
        self.state = if self.files.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Listed
        };
    }

    pub fn snapshot(&self, player_bound: bool) -> SessionSnapshot {
        SessionSnapshot {
            magnet_id: self.magnet_id.clone(),
            added: self.added,
            state: self.state.clone(),
            files: self.files.clone(),
            selected: self.selected.clone(),
            video_source: self.sources.as_ref().map(|s| s.video.clone()),
            subtitle_source: self.sources.as_ref().and_then(|s| s.subtitle.clone()),
            external: self.external.clone(),
            player_bound,
        }
    }
}

/// Read-only view of a session handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub magnet_id: String,
    pub added: bool,
    pub state: PlaybackState,
    pub files: Vec<FileEntry>,
    pub selected: Option<PlaybackTarget>,
    pub video_source: Option<String>,
    pub subtitle_source: Option<String>,
    pub external: Option<ExternalDispatch>,
    pub player_bound: bool,
}
